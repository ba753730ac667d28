//! The seam to guest language implementations.
//!
//! What happens inside a guest program is not this crate's business: a
//! language implementation is handed source text plus a [`GuestEnv`] and
//! returns either a [`Value`] or a classified [`GuestError`]. Implementations
//! are installed process-wide with [`install_language`] or per builder with
//! [`EngineBuilder::language`](crate::engine::EngineBuilder::language).

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::exception::GuestError;
use crate::value::{GuestEnv, Value};

/// One guest language implementation.
///
/// Implementations must poll [`Context::cancellation_requested`](crate::context::Context::cancellation_requested)
/// at reasonable intervals and return [`GuestError::cancelled`] when it turns
/// true, and must consult the context's [`Capabilities`](crate::context::Capabilities)
/// before performing privileged operations such as IO.
pub trait GuestLanguage: Send + Sync + 'static {
    /// Primary identification string, e.g. `js`.
    fn id(&self) -> &str;

    /// Evaluate one unit of guest source.
    ///
    /// `name` is a diagnostic label for the source (script name, file path);
    /// it has no semantic meaning to this layer.
    ///
    /// # Errors
    /// Returns a [`GuestError`] for parse errors, guest-level runtime
    /// failures, cancellation, and internal language faults.
    fn eval(
        &self,
        env: &GuestEnv<'_>,
        name: &str,
        source: &str,
    ) -> core::result::Result<Value, GuestError>;
}

fn registry() -> &'static Mutex<Vec<Arc<dyn GuestLanguage>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Arc<dyn GuestLanguage>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Install a language process-wide.
///
/// Engines built afterwards see it in their language set. Installing a
/// language with an id that is already present replaces the previous
/// implementation.
pub fn install_language(language: Arc<dyn GuestLanguage>) {
    let mut languages = registry().lock();
    if let Some(existing) = languages.iter_mut().find(|l| l.id() == language.id()) {
        *existing = language;
    } else {
        languages.push(language);
    }
}

pub(crate) fn installed_languages() -> Vec<Arc<dyn GuestLanguage>> {
    registry().lock().clone()
}
