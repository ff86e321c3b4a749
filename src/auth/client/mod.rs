//! Browser-side auth components
//!
//! These run inside one page: they share a single provider scope for the
//! page's lifetime and act on the page through a [`Navigator`]. Each holds
//! a [`CancelToken`](crate::auth::cancel::CancelToken) and checks it after
//! every await before touching state or navigating.

mod exchanger;
mod guard;
mod signout;

pub use exchanger::{ExchangeOutcome, SessionExchanger};
pub use guard::SessionGuard;
pub use signout::{SignoutOutcome, sign_out};

use super::redirect::RedirectTarget;

/// Navigation side effects available to client components
#[cfg_attr(test, mockall::automock)]
pub trait Navigator: Send + Sync {
    /// Replace the current history entry with `target`
    fn replace(&self, target: &RedirectTarget);

    /// Re-fetch the current page's data in place
    fn refresh(&self);

    /// Drop the URL fragment from the current history entry
    fn clear_fragment(&self);
}
