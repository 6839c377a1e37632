//! Renderer sessions and the pool that bounds them

mod chromium;
mod http;
mod pool;
mod traits;
mod user_agent;

pub use chromium::{ChromiumRenderer, ChromiumSession};
pub use http::{build_http_client, HttpRenderer, HttpSession, DEFAULT_USER_AGENT};
pub use pool::{BrowserPool, PoolError, SessionLease};
pub use traits::{RenderError, RenderSession, RenderedPage, Renderer};
pub use user_agent::UserAgentRotation;
