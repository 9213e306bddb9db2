//! Per-operation routing between the network and the local store.

use hyperoffline_common::is_offline_only;

use crate::connectivity::Connectivity;

/// Where a resource operation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Pass the call through to the resource context.
    Network,
    /// Serve the call from the local store.
    LocalStore,
}

impl Route {
    pub fn is_local(&self) -> bool {
        matches!(self, Route::LocalStore)
    }
}

/// Decide where an operation on `uri` goes.
///
/// Evaluated once when the operation starts; the branch chosen then is kept
/// even if connectivity changes before the operation finishes.
pub fn route(connectivity: Connectivity, uri: &str) -> Route {
    if connectivity.is_offline() || is_offline_only(uri) {
        Route::LocalStore
    } else {
        Route::Network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_routes() {
        assert_eq!(route(Connectivity::Online, "http://x/1"), Route::Network);
        assert_eq!(route(Connectivity::Offline, "http://x/1"), Route::LocalStore);
        assert_eq!(route(Connectivity::Online, "local:draft-1"), Route::LocalStore);
        assert_eq!(route(Connectivity::Offline, "local:draft-1"), Route::LocalStore);
    }

    fn connectivity() -> impl Strategy<Value = Connectivity> {
        prop_oneof![Just(Connectivity::Online), Just(Connectivity::Offline)]
    }

    proptest! {
        #[test]
        fn network_uris_go_local_only_when_offline(
            status in connectivity(),
            host in "[a-z]{1,10}",
            path in "[a-z0-9/]{0,12}",
            tls in any::<bool>(),
        ) {
            let uri = format!("{}://{}.test/{}", if tls { "https" } else { "http" }, host, path);
            prop_assert_eq!(route(status, &uri).is_local(), status.is_offline());
        }

        #[test]
        fn other_uris_always_go_local(status in connectivity(), uri in "[a-g][a-z0-9:/_-]{0,20}") {
            prop_assert_eq!(route(status, &uri), Route::LocalStore);
        }
    }
}
