//! Sandboxed live-preview editing for scraped page snapshots.
//!
//! A [`SiteSnapshot`] is compiled into a self-contained document whose
//! editable elements are stamped with per-instance ids at load time. Clicks
//! inside the isolated context select an instance; a prompt about the
//! selection is translated into a validated property map, applied to exactly
//! that instance, and recorded in a ledger from which CSS and content notes
//! are synthesized.
//!
//! ```no_run
//! use site_preview::{LocalContext, Session, SiteSnapshot};
//!
//! # fn run(json: &str) -> site_preview::Result<()> {
//! let (mut session, mount) = Session::open(SiteSnapshot::from_json(json)?)?;
//! let mut context = LocalContext::mount(mount);
//! context.click("cta-0");
//! session.pump_events();
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod bridge;
pub mod channel;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod context;
pub mod dom;
pub mod error;
pub mod injector;
pub mod ledger;
pub mod protocol;
pub mod replay;
pub mod selection;
pub mod session;
pub mod snapshot;
pub mod synthesizer;
pub mod translator;
pub mod web;

pub use compiler::{compile, CompileOptions, CompiledDocument};
pub use config::EditorConfig;
pub use context::LocalContext;
pub use error::{EditorError, Result};
pub use ledger::{HistoryLedger, ModificationRecord};
pub use protocol::{Epoch, Modifications, PropertyName};
pub use session::{Session, SessionState};
pub use snapshot::{SiteSnapshot, TargetableElement};
pub use synthesizer::synthesize;
pub use translator::{TranslationOutcome, Translator};
