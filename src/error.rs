//! Error taxonomy shared by the credential resolver, token exchange, and token provider.

// self
use crate::{_prelude::*, credential::CredentialField};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error type used where the underlying failure originates outside this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem; fails fast and is never retried.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token acquisition failure surfaced by the token provider.
	#[error(transparent)]
	Auth(#[from] AuthError),

	/// Connection setup failed; carries the node reference for user-facing display.
	#[error("Failed to set up the model connection for node `{node}`.")]
	Setup {
		/// Reference to the node whose credential setup failed.
		node: String,
		/// Original failure cause.
		#[source]
		source: Box<Error>,
	},
}
impl Error {
	/// Wraps an error with the node context it surfaced from.
	pub fn for_node(self, node: impl Into<String>) -> Self {
		Self::Setup { node: node.into(), source: Box::new(self) }
	}
}

/// Credential and settings validation failures.
///
/// Variants name the offending field class abstractly and never echo credential values.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A compound field was present but did not split into exactly two non-empty parts.
	#[error("Credential field `{field}` is malformed; expected exactly two non-empty `|` parts.")]
	MalformedField {
		/// Field class that failed to parse.
		field: CredentialField,
	},
	/// A field required by the selected encoding convention is absent or empty.
	#[error("Credential field `{field}` is missing.")]
	MissingField {
		/// Field class that is absent.
		field: CredentialField,
	},
	/// Legacy encoding was selected but no legacy deployment settings were supplied.
	#[error("Legacy credential encoding requires configured legacy settings.")]
	MissingLegacySettings,
	/// The stored endpoint value cannot be parsed as a URL.
	#[error("Endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The identity authority produced an invalid token endpoint URL.
	#[error("Identity authority URL is invalid.")]
	InvalidAuthority {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// A resolved identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::credential::IdentifierError),
	/// The external credential store could not produce the named record.
	#[error("Stored credential record could not be fetched.")]
	CredentialFetch {
		/// Failure reported by the external credential store.
		#[source]
		source: BoxError,
	},
}

/// Token acquisition failures surfaced by [`TokenProvider`](crate::provider::TokenProvider).
///
/// Clonable so a single coalesced refresh outcome can be handed to every waiting caller.
#[derive(Clone, Debug, ThisError)]
pub enum AuthError {
	/// The exchange with the identity provider failed; no cached token is retained.
	#[error("Bearer token exchange failed.")]
	ExchangeFailed {
		/// Underlying exchange failure, shared across coalesced callers.
		#[source]
		cause: Arc<ExchangeError>,
	},
	/// An in-flight acquisition was abandoned because the owning connection closed.
	#[error("Token acquisition was cancelled; the owning connection is closed.")]
	Cancelled,
}
impl AuthError {
	/// Wraps an exchange failure for propagation to coalesced callers.
	pub fn exchange_failed(cause: ExchangeError) -> Self {
		Self::ExchangeFailed { cause: Arc::new(cause) }
	}
}

/// Failures raised while performing the resource-owner-password exchange.
#[derive(Debug, ThisError)]
pub enum ExchangeError {
	/// The identity provider rejected the grant (bad credentials, disabled client, ...).
	#[error("Identity provider rejected the grant: {reason}.")]
	Rejected {
		/// Provider-supplied reason string; credential values are never included.
		reason: String,
	},
	/// The token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The token endpoint responded with malformed JSON.
	#[error("Token endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// An IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),

	/// The token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// The token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// The token endpoint returned a non-positive lifetime.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ExchangeError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ExchangeError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
