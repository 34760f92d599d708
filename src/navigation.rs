//! Navigation target for the UI shell
//!
//! The core only decides *where* the user should be; the shell watches
//! [`Navigator::subscribe`] and renders.

use serde::Serialize;
use tokio::sync::watch;

use crate::types::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Unlock,
    CreateWallet,
    Bitcoin,
    Ethereum,
}

impl From<Chain> for Route {
    fn from(chain: Chain) -> Self {
        match chain {
            Chain::Bitcoin => Route::Bitcoin,
            Chain::Ethereum => Route::Ethereum,
        }
    }
}

#[derive(Clone)]
pub struct Navigator {
    sender: watch::Sender<Route>,
}

impl Navigator {
    pub fn new(initial: Route) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn go(&self, route: Route) {
        let previous = self.sender.send_replace(route);
        if previous != route {
            log::debug!("Navigate {:?} -> {:?}", previous, route);
        }
    }

    pub fn current(&self) -> Route {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Route> {
        self.sender.subscribe()
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(Route::Unlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_latest_route() {
        let nav = Navigator::default();
        let mut rx = nav.subscribe();
        nav.go(Route::from(Chain::Ethereum));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Route::Ethereum);
        assert_eq!(nav.current(), Route::Ethereum);
    }
}
