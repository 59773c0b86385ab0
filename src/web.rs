//! Browser front end: a small raw-TCP HTTP server.
//!
//! Routes:
//! - `GET /` serves the editor page ([`EDITOR_HTML`])
//! - `POST /session` registers a snapshot and answers `{code, token, wsUrl}`
//! - `GET /ws/CODE?token=…` upgrades to the editing WebSocket ([`crate::bridge`])

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::bridge::{self, SnapshotStore};
use crate::compiler::CompileOptions;
use crate::config::EditorConfig;
use crate::snapshot::SiteSnapshot;
use crate::translator::{self, Translator};

/// Upper bound on request head size.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const PEEK_RETRY: Duration = Duration::from_millis(5);
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded editor page. The preview lives in a sandboxed iframe; this page
/// relays its messages to and from the server socket.
pub const EDITOR_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Site Preview</title>
<style>
*{margin:0;padding:0;box-sizing:border-box}
body{background:#0d1117;color:#c9d1d9;font-family:'Cascadia Code','Fira Code',monospace;height:100vh;display:flex;flex-direction:column}
header{padding:12px 24px;border-bottom:1px solid #21262d;display:flex;align-items:center;justify-content:space-between}
header h1{font-size:1.1rem;color:#58a6ff}
#status{font-size:.75rem;color:#8b949e}
main{flex:1;display:grid;grid-template-columns:1fr 360px;min-height:0}
#stage{display:flex;flex-direction:column;min-height:0;border-right:1px solid #21262d}
#preview{flex:1;border:none;background:#fff;width:100%}
#loader{padding:16px 24px;display:flex;flex-direction:column;gap:8px;background:#161b22;border-bottom:1px solid #21262d}
#loader.hide{display:none}
#loader textarea{height:140px;background:#0d1117;border:1px solid #30363d;color:#c9d1d9;padding:8px;border-radius:6px;font-family:inherit;font-size:.8rem;resize:vertical}
aside{display:flex;flex-direction:column;min-height:0;background:#161b22}
.panel{padding:12px 16px;border-bottom:1px solid #21262d}
.label{font-size:.7rem;color:#8b949e;text-transform:uppercase;letter-spacing:.5px;margin-bottom:6px;display:block}
#selection{font-size:.85rem;color:#f0883e;word-break:break-all}
#prompt-form{display:flex;gap:6px}
#prompt{flex:1;background:#0d1117;border:1px solid #30363d;color:#c9d1d9;padding:6px 10px;border-radius:6px;font-family:inherit;font-size:.85rem}
#prompt:focus{outline:none;border-color:#58a6ff}
.btn{border:none;padding:6px 14px;border-radius:6px;font-family:inherit;font-size:.8rem;cursor:pointer;color:#fff}
.btn-go{background:#238636}.btn-go:hover{background:#2ea043}
.btn-go:disabled{background:#21262d;color:#484f58;cursor:not-allowed}
.btn-mode{background:#30363d}.btn-mode:hover{background:#484f58}
.btn-export{background:#6e40c9}.btn-export:hover{background:#8957e5}
.row{display:flex;gap:6px;flex-wrap:wrap}
#history{flex:1;overflow-y:auto;padding:8px 16px;font-size:.78rem}
.entry{padding:6px 0;border-bottom:1px dashed #21262d}
.entry .who{color:#58a6ff}
.entry .props{color:#3fb950;white-space:pre-wrap}
.entry.err{color:#f85149}
#code-wrap{display:none;max-height:40vh;overflow:auto;background:#0a0e14;border-top:1px solid #21262d}
#code-wrap.show{display:block}
#code{padding:12px 16px;font-size:.75rem;white-space:pre-wrap;color:#e3b341}
#counts{font-size:.72rem;color:#8b949e}
</style>
</head>
<body>
<header>
<h1>Site Preview</h1>
<span id="status">not connected</span>
</header>
<main>
<section id="stage">
<div id="loader">
<span class="label">Snapshot JSON</span>
<textarea id="snapshot" placeholder='{"html":"...","css":"...","structureMetadata":{"title":"..."},"targetableElements":[{"croId":"cta","selector":"button.cta","type":"button","text":"Buy"}]}'></textarea>
<div class="row"><button class="btn btn-go" id="open">Open snapshot</button></div>
</div>
<iframe id="preview" sandbox="allow-scripts" title="Preview"></iframe>
</section>
<aside>
<div class="panel">
<span class="label">Selected element</span>
<div id="selection">click an element in the preview</div>
</div>
<div class="panel">
<form id="prompt-form">
<input id="prompt" type="text" placeholder="make it green" autocomplete="off" disabled>
<button class="btn btn-go" id="send" type="submit" disabled>Apply</button>
</form>
</div>
<div class="panel row">
<button class="btn btn-export" id="show-code">Show code</button>
<button class="btn btn-mode" id="reset">Reset</button>
<span id="counts"></span>
</div>
<div id="history"></div>
<div id="code-wrap"><pre id="code"></pre></div>
</aside>
</main>
<script>
const $=s=>document.querySelector(s);
const frameEl=$('#preview');
let ws=null,epoch=null,mountReady=false,state='idle',selected=null;

function status(t){$('#status').textContent=t}
function send(m){if(ws&&ws.readyState===1)ws.send(JSON.stringify(m))}

function note(text,cls){
  const d=document.createElement('div');
  d.className='entry'+(cls?' '+cls:'');
  d.textContent=text;
  $('#history').appendChild(d);
  d.scrollIntoView({block:'end'});
}

function addRecord(r){
  const d=document.createElement('div');
  d.className='entry';
  const who=document.createElement('div');
  who.className='who';
  who.textContent=r.instanceId+' ← '+r.prompt;
  const props=document.createElement('div');
  props.className='props';
  props.textContent=Object.entries(r.properties).map(([k,v])=>k+': '+v).join('\n');
  d.appendChild(who);d.appendChild(props);
  $('#history').appendChild(d);
  d.scrollIntoView({block:'end'});
}

function renderState(m){
  state=m.state;selected=m.selection;
  $('#selection').textContent=selected?selected.instanceId+' <'+selected.tagName.toLowerCase()+'> '+selected.selector:'click an element in the preview';
  const busy=state==='awaitingTranslation'||state==='applying';
  $('#prompt').disabled=!selected||busy;
  $('#send').disabled=!selected||busy;
  $('#send').textContent=busy?'Working…':'Apply';
  $('#counts').textContent='epoch '+m.epoch+' · '+m.ledgerLen+' edits';
}

function mount(m){
  mountReady=false;
  epoch=m.epoch;
  frameEl.srcdoc=m.document;
}

frameEl.addEventListener('load',()=>{if(epoch!==null)mountReady=true});

window.addEventListener('message',e=>{
  if(e.source!==frameEl.contentWindow||!mountReady)return;
  const m=e.data;
  if(!m||m.type!=='elementSelected')return;
  send({type:'frame',frame:{epoch:epoch,message:m}});
});

function handle(m){
  switch(m.type){
    case 'mount':mount(m);break;
    case 'command':
      if(mountReady&&m.frame.epoch===epoch)frameEl.contentWindow.postMessage(m.frame.message,'*');
      break;
    case 'state':renderState(m);break;
    case 'applied':addRecord(m.record);break;
    case 'error':note(m.message,'err');break;
    case 'code':
      $('#code').textContent=m.artifact;
      $('#code-wrap').classList.add('show');
      break;
  }
}

function connect(code,token){
  const proto=location.protocol==='https:'?'wss':'ws';
  ws=new WebSocket(proto+'://'+location.host+'/ws/'+encodeURIComponent(code)+'?token='+encodeURIComponent(token));
  ws.onopen=()=>{status('session '+code);$('#loader').classList.add('hide')};
  ws.onclose=()=>{status('disconnected');mountReady=false};
  ws.onmessage=e=>{let m;try{m=JSON.parse(e.data)}catch(_){return}handle(m)};
}

$('#open').onclick=async()=>{
  const body=$('#snapshot').value.trim();
  if(!body)return;
  try{
    const res=await fetch('/session',{method:'POST',headers:{'Content-Type':'application/json'},body});
    const data=await res.json();
    if(!res.ok){note(data.error||('HTTP '+res.status),'err');return}
    connect(data.code,data.token);
  }catch(err){note(String(err),'err')}
};

$('#prompt-form').onsubmit=e=>{
  e.preventDefault();
  const p=$('#prompt').value.trim();
  if(!p||!selected)return;
  note('you: '+p);
  send({type:'prompt',prompt:p});
  $('#prompt').value='';
};

$('#reset').onclick=()=>{$('#history').textContent='';send({type:'reset'})};
$('#show-code').onclick=()=>send({type:'synthesize'});

const q=new URLSearchParams(location.search);
if(q.get('code')&&q.get('token'))connect(q.get('code'),q.get('token'));
</script>
</body>
</html>"##;

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// Percent-decoding for URL query parameters. Decodes to bytes first so
/// multi-byte UTF-8 sequences survive; invalid escapes are kept literally.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, val) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key), url_decode(val))
        })
        .collect()
}

/// Split a request target into its path and parsed query.
pub fn split_target(target: &str) -> (&str, HashMap<String, String>) {
    match target.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (target, HashMap::new()),
    }
}

// ---------------------------------------------------------------------------
// Request head parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    /// Offset of the first body byte in the buffer the head was parsed from.
    pub body_offset: usize,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
    }
}

/// Parse a request head. `Ok(None)` means more bytes are needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let body_offset = match req.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };
    Ok(Some(RequestHead {
        method: req.method.unwrap_or("GET").to_string(),
        target: req.path.unwrap_or("/").to_string(),
        headers: req
            .headers
            .iter()
            .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
            .collect(),
        body_offset,
    }))
}

enum ReadOutcome {
    Request(RequestHead, Vec<u8>),
    TooLarge,
    Malformed,
    Closed,
}

async fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> std::io::Result<ReadOutcome> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let head = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(ReadOutcome::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_head(&buf) {
            Ok(Some(head)) => break head,
            Ok(None) if buf.len() > MAX_HEADER_BYTES => return Ok(ReadOutcome::TooLarge),
            Ok(None) => continue,
            Err(_) => return Ok(ReadOutcome::Malformed),
        }
    };

    let wanted = head.content_length();
    if wanted > max_body_bytes {
        return Ok(ReadOutcome::TooLarge);
    }
    let mut body = buf.split_off(head.body_offset);
    while body.len() < wanted {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(ReadOutcome::Closed);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(wanted);
    Ok(ReadOutcome::Request(head, body))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

async fn respond_json<T: Serialize>(stream: &mut TcpStream, status: &str, value: &T) -> std::io::Result<()> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    respond(stream, status, "application/json", &body).await
}

async fn respond_error(stream: &mut TcpStream, status: &str, message: &str) -> std::io::Result<()> {
    respond_json(stream, status, &serde_json::json!({ "error": message })).await
}

/// Drain unread request bytes so closing the socket does not reset the
/// connection before the client reads our response.
async fn discard_input(stream: &mut TcpStream) {
    let mut sink = [0u8; 4096];
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub code: String,
    pub token: String,
    pub ws_url: String,
}

impl SessionCreated {
    pub fn new(code: String, token: String) -> Self {
        let ws_url = format!("/ws/{}?token={}", code, token);
        SessionCreated { code, token, ws_url }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Shared per-server state handed to every connection.
#[derive(Clone)]
pub struct ServerState {
    pub store: SnapshotStore,
    pub options: CompileOptions,
    pub translator: Arc<dyn Translator>,
    pub max_body_bytes: usize,
}

impl ServerState {
    pub fn new(config: &EditorConfig, translator: Arc<dyn Translator>) -> Self {
        ServerState {
            store: bridge::new_snapshot_store(),
            options: config.editor.clone(),
            translator,
            max_body_bytes: config.server.max_body_bytes,
        }
    }
}

/// Start the editor server. A preloaded snapshot is registered up front and
/// its editor URL printed.
pub async fn serve(
    config: &EditorConfig,
    preload: Option<SiteSnapshot>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    let translator = translator::from_config(&config.translator)?;
    let state = ServerState::new(config, translator);

    let base = format!("http://localhost:{}", config.server.port);
    eprintln!("{}", format!("  Editor running at {}", base).bright_green());
    match config.translator.endpoint.as_deref() {
        Some(url) => eprintln!("{}", format!("  Translator: {}", url).bright_cyan()),
        None => eprintln!(
            "{}",
            "  No translator configured; prompts will report a translation failure.".yellow()
        ),
    }
    if let Some(snapshot) = preload {
        let (code, token) = bridge::register_snapshot(&state.store, snapshot);
        eprintln!(
            "{}",
            format!("  Snapshot loaded: {}/?code={}&token={}", base, code, token).bright_green()
        );
    }
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    let ttl_ms = config.server.session_ttl_secs.saturating_mul(1000);
    let store = state.store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = bridge::prune_expired(&store, ttl_ms);
            if removed > 0 {
                debug!(removed, "pruned expired snapshots");
            }
        }
    });

    run(listener, state).await?;
    Ok(())
}

/// Accept connections forever.
pub async fn run(listener: TcpListener, state: ServerState) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(%peer, error = %e, "connection error");
            }
        });
    }
}

/// Peek until a complete request head is buffered. `None` if the peer
/// closes, the head is malformed or oversized, or it does not complete within
/// [`HEAD_TIMEOUT`].
async fn peek_head(stream: &TcpStream) -> Option<RequestHead> {
    let mut buf = vec![0u8; MAX_HEADER_BYTES];
    let peek = async {
        loop {
            let n = stream.peek(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            match parse_head(&buf[..n]) {
                Ok(Some(head)) => return Some(head),
                Ok(None) if n < MAX_HEADER_BYTES => tokio::time::sleep(PEEK_RETRY).await,
                _ => return None,
            }
        }
    };
    tokio::time::timeout(HEAD_TIMEOUT, peek).await.ok().flatten()
}

async fn handle_connection(mut stream: TcpStream, state: ServerState) -> std::io::Result<()> {
    // Peek at the head to detect WebSocket upgrades without consuming the
    // handshake bytes.
    if let Some(head) = peek_head(&stream).await {
        if head.is_websocket_upgrade() {
            return upgrade(stream, &head, state).await;
        }
    }

    let (head, body) = match read_request(&mut stream, state.max_body_bytes).await? {
        ReadOutcome::Request(head, body) => (head, body),
        ReadOutcome::TooLarge => {
            respond_error(&mut stream, "413 Payload Too Large", "request too large").await?;
            stream.shutdown().await?;
            discard_input(&mut stream).await;
            return Ok(());
        }
        ReadOutcome::Malformed => {
            return respond_error(&mut stream, "400 Bad Request", "malformed request").await
        }
        ReadOutcome::Closed => return Ok(()),
    };
    let (path, _query) = split_target(&head.target);

    match (head.method.as_str(), path) {
        ("GET", "/") | ("GET", "/index.html") => {
            respond(
                &mut stream,
                "200 OK",
                "text/html; charset=utf-8",
                EDITOR_HTML.as_bytes(),
            )
            .await
        }
        ("POST", "/session") => {
            let Ok(raw) = std::str::from_utf8(&body) else {
                return respond_error(&mut stream, "400 Bad Request", "body is not UTF-8").await;
            };
            match SiteSnapshot::from_json(raw) {
                Ok(snapshot) => {
                    let targets = snapshot.targetable_elements.len();
                    let (code, token) = bridge::register_snapshot(&state.store, snapshot);
                    info!(%code, targets, "snapshot registered");
                    respond_json(&mut stream, "201 Created", &SessionCreated::new(code, token)).await
                }
                Err(e) => respond_error(&mut stream, "400 Bad Request", &e.to_string()).await,
            }
        }
        (_, "/" | "/index.html" | "/session") => {
            respond_error(&mut stream, "405 Method Not Allowed", "method not allowed").await
        }
        _ => respond_error(&mut stream, "404 Not Found", "not found").await,
    }
}

async fn upgrade(mut stream: TcpStream, head: &RequestHead, state: ServerState) -> std::io::Result<()> {
    let (path, query) = split_target(&head.target);
    let Some(code) = path.strip_prefix("/ws/").filter(|c| !c.is_empty()) else {
        return respond_error(&mut stream, "404 Not Found", "not found").await;
    };
    let token = query.get("token").map(String::as_str).unwrap_or("");
    let Some(snapshot) = bridge::authorize(&state.store, code, token) else {
        warn!(%code, "rejected editor connection");
        return respond_error(&mut stream, "401 Unauthorized", "unknown session or bad token").await;
    };

    match tokio_tungstenite::accept_async(stream).await {
        Ok(ws_stream) => {
            bridge::handle_ws(ws_stream, snapshot, state.options, state.translator).await;
        }
        Err(e) => debug!(error = %e, "websocket handshake failed"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::ScriptedTranslator;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    // -- url_decode / parse_query --

    #[test]
    fn test_url_decode_basic() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("a%26b"), "a&b");
        assert_eq!(url_decode("plain"), "plain");
        assert_eq!(url_decode(""), "");
    }

    #[test]
    fn test_url_decode_multibyte() {
        assert_eq!(url_decode("caf%C3%A9"), "café");
    }

    #[test]
    fn test_url_decode_bad_escape_kept() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("%4"), "%4");
    }

    #[test]
    fn test_parse_query_basic() {
        let params = parse_query("token=abc123&x=hello+world");
        assert_eq!(params.get("token").map(|s| s.as_str()), Some("abc123"));
        assert_eq!(params.get("x").map(|s| s.as_str()), Some("hello world"));
    }

    #[test]
    fn test_parse_query_empty_and_bare_keys() {
        assert!(parse_query("").is_empty());
        let params = parse_query("flag&k=");
        assert_eq!(params.get("flag").map(|s| s.as_str()), Some(""));
        assert_eq!(params.get("k").map(|s| s.as_str()), Some(""));
    }

    #[test]
    fn test_split_target() {
        let (path, q) = split_target("/ws/ABC234?token=t");
        assert_eq!(path, "/ws/ABC234");
        assert_eq!(q.get("token").map(|s| s.as_str()), Some("t"));
        let (path, q) = split_target("/");
        assert_eq!(path, "/");
        assert!(q.is_empty());
    }

    // -- request head --

    #[test]
    fn test_parse_head_complete() {
        let raw = b"POST /session HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let head = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.target, "/session");
        assert_eq!(head.content_length(), 5);
        assert_eq!(&raw[head.body_offset..], b"hello");
        assert!(!head.is_websocket_upgrade());
    }

    #[test]
    fn test_parse_head_partial() {
        assert_eq!(parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_head_detects_upgrade_case_insensitively() {
        let raw = b"GET /ws/ABC?token=t HTTP/1.1\r\nupgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n";
        assert!(parse_head(raw).unwrap().unwrap().is_websocket_upgrade());
    }

    #[test]
    fn test_session_created_shape() {
        let v = serde_json::to_value(SessionCreated::new("ABC234".into(), "tok".into())).unwrap();
        assert_eq!(v["code"], "ABC234");
        assert_eq!(v["wsUrl"], "/ws/ABC234?token=tok");
    }

    // -- page --

    #[test]
    fn test_editor_html_sandboxes_preview() {
        assert!(EDITOR_HTML.starts_with("<!DOCTYPE html>"));
        assert!(EDITOR_HTML.contains(r#"sandbox="allow-scripts""#));
        assert!(!EDITOR_HTML.contains("allow-same-origin"));
    }

    #[test]
    fn test_editor_html_relays_frames() {
        assert!(EDITOR_HTML.contains("e.source!==frameEl.contentWindow"));
        assert!(EDITOR_HTML.contains("type:'frame'"));
        assert!(EDITOR_HTML.contains("m.frame.epoch===epoch"));
        assert!(EDITOR_HTML.contains("'/session'"));
    }

    #[test]
    fn test_editor_html_no_external_resources() {
        assert!(!EDITOR_HTML.contains("https://"));
        assert!(!EDITOR_HTML.contains("cdn"));
    }

    // -- live server --

    const SNAPSHOT: &str = r#"{"html":"<h1>Hi</h1><button class=\"cta\">Buy</button>","css":"","structureMetadata":{"title":"T"},"targetableElements":[{"croId":"cta","selector":"button.cta","type":"button","text":"Buy"}]}"#;

    async fn spawn_server(max_body_bytes: usize) -> (String, ServerState) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = EditorConfig::default();
        config.server.max_body_bytes = max_body_bytes;
        let state = ServerState::new(&config, Arc::new(ScriptedTranslator::new()));
        tokio::spawn(run(listener, state.clone()));
        (format!("127.0.0.1:{}", addr.port()), state)
    }

    #[tokio::test]
    async fn test_get_index() {
        let (addr, _) = spawn_server(1 << 20).await;
        let res = reqwest::get(format!("http://{}/", addr)).await.unwrap();
        assert_eq!(res.status().as_u16(), 200);
        assert!(res.text().await.unwrap().contains("Site Preview"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (addr, _) = spawn_server(1 << 20).await;
        let res = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
        assert_eq!(res.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_post_session_registers_snapshot() {
        let (addr, state) = spawn_server(1 << 20).await;
        let res = reqwest::Client::new()
            .post(format!("http://{}/session", addr))
            .body(SNAPSHOT)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 201);
        let v: serde_json::Value = res.json().await.unwrap();
        let code = v["code"].as_str().unwrap();
        let token = v["token"].as_str().unwrap();
        assert!(bridge::authorize(&state.store, code, token).is_some());
    }

    #[tokio::test]
    async fn test_post_session_rejects_bad_json() {
        let (addr, _) = spawn_server(1 << 20).await;
        let res = reqwest::Client::new()
            .post(format!("http://{}/session", addr))
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_post_session_too_large() {
        let (addr, _) = spawn_server(16).await;
        let res = reqwest::Client::new()
            .post(format!("http://{}/session", addr))
            .body(SNAPSHOT)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 413);
    }

    #[tokio::test]
    async fn test_ws_rejects_bad_token() {
        let (addr, state) = spawn_server(1 << 20).await;
        let (code, _token) =
            bridge::register_snapshot(&state.store, SiteSnapshot::from_json(SNAPSHOT).unwrap());
        let url = format!("ws://{}/ws/{}?token=wrong", addr, code);
        assert!(tokio_tungstenite::connect_async(url).await.is_err());
    }

    #[tokio::test]
    async fn test_ws_upgrade_head_split_across_writes() {
        let (addr, state) = spawn_server(1 << 20).await;
        let (code, token) =
            bridge::register_snapshot(&state.store, SiteSnapshot::from_json(SNAPSHOT).unwrap());
        let mut client = TcpStream::connect(addr.as_str()).await.unwrap();
        client.set_nodelay(true).unwrap();
        let first = format!(
            "GET /ws/{}?token={} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\n",
            code, token, addr
        );
        client.write_all(first.as_bytes()).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client
            .write_all(
                b"Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = Vec::new();
        let mut chunk = [0u8; 512];
        while !response.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before handshake response");
            response.extend_from_slice(&chunk[..n]);
        }
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 101"), "{}", text);
    }

    #[tokio::test]
    async fn test_ws_session_mounts_and_pongs() {
        let (addr, state) = spawn_server(1 << 20).await;
        let (code, token) =
            bridge::register_snapshot(&state.store, SiteSnapshot::from_json(SNAPSHOT).unwrap());
        let url = format!("ws://{}/ws/{}?token={}", addr, code, token);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let mount: serde_json::Value = match ws.next().await.unwrap().unwrap() {
            WsMessage::Text(t) => serde_json::from_str(&t).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(mount["type"], "mount");
        assert!(mount["document"].as_str().unwrap().contains("cro-targets"));

        let state_msg: serde_json::Value = match ws.next().await.unwrap().unwrap() {
            WsMessage::Text(t) => serde_json::from_str(&t).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(state_msg["type"], "state");
        assert_eq!(state_msg["state"], "idle");

        ws.send(WsMessage::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        let pong: serde_json::Value = match ws.next().await.unwrap().unwrap() {
            WsMessage::Text(t) => serde_json::from_str(&t).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(pong["type"], "pong");
    }
}
