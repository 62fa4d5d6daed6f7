// Token-exchange middleware translation

use super::Middleware;
use crate::api::TokenExchangeConfig;
use crate::resources::env::TOKEN_EXCHANGE_CLIENT_SECRET_VAR;

/// Translate a token-exchange config into its middleware entry. The client
/// secret is referenced through its well-known env var, never inlined.
pub fn translate_token_exchange(config: &TokenExchangeConfig) -> Middleware {
	Middleware::TokenExchange {
		token_url: config.token_url.clone(),
		client_id: config.client_id.clone(),
		client_secret_env: TOKEN_EXCHANGE_CLIENT_SECRET_VAR.to_string(),
		audience: config.audience.clone(),
		scopes: config.scopes.clone(),
		subject_token_type: config.subject_token_type.clone(),
	}
}
