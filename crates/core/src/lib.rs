pub mod chat;
pub mod lifecycle;
pub mod playback;
pub mod session;
pub mod speech;

pub use session::Companion;

/// UI events the request lifecycle emits for the runtime to render.
///
/// Keeping these on a channel leaves the controller free of any terminal or
/// window code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Blocking, user-visible message (validation or fetch failure).
    Alert(String),
    /// A request went out.
    Loading,
    /// The latest request finished; `None` when the reply had no text.
    Message(Option<String>),
}
