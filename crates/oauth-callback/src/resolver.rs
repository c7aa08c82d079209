//! Provider attribution for a callback

use backend::Provider;
use tracing::debug;

use crate::state::DecodedState;

/// Picks a provider when the `state` did not name one.
pub type FallbackPolicy = fn(&DecodedState) -> Provider;

/// Route unattributed callbacks through Google, the backend-mediated path.
///
/// A GitHub sign-in whose `state` was lost on the way back is therefore
/// exchanged as Google. The backend rejects the code in that case and the
/// user sees an exchange failure.
pub fn default_to_google(_: &DecodedState) -> Provider {
    Provider::Google
}

/// Decides which identity provider produced a callback.
#[derive(Debug, Clone, Copy)]
pub struct ProviderResolver {
    fallback: FallbackPolicy,
}

impl Default for ProviderResolver {
    fn default() -> Self {
        Self::new(default_to_google)
    }
}

impl ProviderResolver {
    pub fn new(fallback: FallbackPolicy) -> Self {
        Self { fallback }
    }

    pub fn resolve(&self, decoded: &DecodedState) -> Provider {
        match decoded.provider.known() {
            Some(provider) => provider,
            None => {
                let provider = (self.fallback)(decoded);
                debug!(
                    %provider,
                    state_present = !decoded.raw.is_empty(),
                    "state names no provider, applying fallback"
                );
                provider
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{self, DecodedProvider};

    #[test]
    fn known_providers_pass_through() {
        let resolver = ProviderResolver::default();
        for provider in [Provider::Google, Provider::Github] {
            let decoded = state::decode(Some(&state::encode(provider)));
            assert_eq!(resolver.resolve(&decoded), provider);
        }
    }

    #[test]
    fn unknown_defaults_to_google() {
        let resolver = ProviderResolver::default();
        assert_eq!(resolver.resolve(&state::decode(None)), Provider::Google);
        assert_eq!(
            resolver.resolve(&state::decode(Some("garbage"))),
            Provider::Google
        );
    }

    #[test]
    fn fallback_policy_is_swappable() {
        fn always_github(_: &DecodedState) -> Provider {
            Provider::Github
        }
        let resolver = ProviderResolver::new(always_github);
        let decoded = DecodedState {
            provider: DecodedProvider::Unknown,
            raw: String::new(),
        };
        assert_eq!(resolver.resolve(&decoded), Provider::Github);

        // The policy is only consulted for unknown states
        let google = state::decode(Some(&state::encode(Provider::Google)));
        assert_eq!(resolver.resolve(&google), Provider::Google);
    }
}
