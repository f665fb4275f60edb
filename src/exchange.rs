//! Delegated resource-owner-password exchange against the identity provider.
//!
//! The actual OAuth 2.0 wire protocol is owned by the `oauth2` crate; this module only wires a
//! resolved identity into a token-endpoint-only client and maps responses and failures into the
//! crate's error taxonomy. [`TokenExchange`] is the seam that keeps the caching state machine in
//! [`provider`](crate::provider) testable without any HTTP stack.

// crates.io
use oauth2::{
	AuthType, ClientId as OAuthClientId, EndpointNotSet, EndpointSet, HttpClientError,
	RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername, Scope, TokenResponse,
	TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	credential::{ResolvedIdentity, SecretString, TenantId},
	error::{ConfigError, ExchangeError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

type ConfiguredPasswordClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeTokenResponse = oauth2::basic::BasicTokenResponse;

/// Boxed future returned by [`TokenExchange::exchange_token`].
pub type ExchangeFuture<'a> =
	Pin<Box<dyn Future<Output = Result<IssuedToken, ExchangeError>> + 'a + Send>>;

/// Token minted by a successful exchange.
#[derive(Clone, Debug)]
pub struct IssuedToken {
	/// Bearer token value; callers must avoid logging it.
	pub secret: SecretString,
	/// Instant the token was observed as issued.
	pub issued_at: OffsetDateTime,
	/// Expiry instant derived from the provider's `expires_in`.
	pub expires_at: OffsetDateTime,
}

/// Single-method exchange capability invoked by the token provider whenever a refresh is due.
pub trait TokenExchange: Send + Sync {
	/// Performs one exchange with the identity provider.
	fn exchange_token(&self) -> ExchangeFuture<'_>;
}

/// Maps HTTP transport failures into [`ExchangeError`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into an exchange error.
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> ExchangeError;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> ExchangeError {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
			HttpClientError::Http(inner) => ExchangeError::HttpRequest(inner),
			HttpClientError::Io(inner) => ExchangeError::Io(inner),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_unknown_transport_error(meta),
		}
	}
}

/// Exchanger specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestPasswordGrantExchanger =
	PasswordGrantExchanger<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// `oauth2`-backed implementation of [`TokenExchange`] for the password grant.
///
/// The exchanger owns the resolved identity and the fixed scope, so every invocation performs
/// the same exchange; renewal policy lives entirely in the token provider.
pub struct PasswordGrantExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredPasswordClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	username: ResourceOwnerUsername,
	password: ResourceOwnerPassword,
	scope: Scope,
}
impl<C, M> PasswordGrantExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds an exchanger for the resolved identity against `{authority}/{tenant}` with the
	/// fixed target scope. Client authentication goes into the request body, as the password
	/// grant expects for public clients.
	pub fn from_identity(
		identity: ResolvedIdentity,
		scope: impl Into<String>,
		authority: &Url,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self, ConfigError> {
		let token_url = token_endpoint(authority, &identity.tenant_id)?;
		let oauth_client = BasicClient::new(OAuthClientId::new(identity.client_id.into()))
			.set_auth_type(AuthType::RequestBody)
			.set_token_uri(token_url);

		Ok(Self {
			oauth_client,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			username: ResourceOwnerUsername::new(identity.username),
			password: ResourceOwnerPassword::new(identity.password.expose().to_owned()),
			scope: Scope::new(scope.into()),
		})
	}
}
impl<C, M> TokenExchange for PasswordGrantExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange_token(&self) -> ExchangeFuture<'_> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let response = self
				.oauth_client
				.exchange_password(&self.username, &self.password)
				.add_scope(self.scope.clone())
				.request_async(&instrumented)
				.await
				.map_err(|err| map_request_error(meta.take(), err, self.error_mapper.as_ref()))?;

			map_password_token_response(response)
		})
	}
}
impl<C, M> Debug for PasswordGrantExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PasswordGrantExchanger")
			.field("username", &"<redacted>")
			.field("password", &"<redacted>")
			.field("scope", &self.scope)
			.finish()
	}
}

fn token_endpoint(authority: &Url, tenant: &TenantId) -> Result<TokenUrl, ConfigError> {
	let base = authority.as_str().trim_end_matches('/');

	TokenUrl::new(format!("{base}/{tenant}/oauth2/v2.0/token"))
		.map_err(|source| ConfigError::InvalidAuthority { source })
}

fn map_password_token_response(response: FacadeTokenResponse) -> Result<IssuedToken, ExchangeError> {
	let expires_in = response.expires_in().ok_or(ExchangeError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ExchangeError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ExchangeError::NonPositiveExpiresIn);
	}

	let issued_at = OffsetDateTime::now_utc();
	// The lifetime comes from the identity provider; an absurd value must map to an error
	// instead of overflowing the datetime arithmetic.
	let expires_at = issued_at
		.checked_add(Duration::seconds(expires_in))
		.ok_or(ExchangeError::ExpiresInOutOfRange)?;

	Ok(IssuedToken {
		secret: SecretString::new(response.access_token().secret().to_owned()),
		issued_at,
		expires_at,
	})
}

fn map_request_error<E, M>(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> ExchangeError
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(response, meta_ref),
		RequestTokenError::Request(error) => mapper.map_transport_error(meta_ref, error),
		RequestTokenError::Parse(error, _body) =>
			ExchangeError::ResponseParse { source: error, status: meta_status(meta_ref) },
		RequestTokenError::Other(message) => ExchangeError::TokenEndpoint {
			message: format!("Token endpoint returned an unexpected response: {message}"),
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		},
	}
}

fn map_server_response_error(
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> ExchangeError {
	let reason = match response.error_description() {
		Some(description) => description.clone(),
		None => response.error().as_ref().to_owned(),
	};

	match response.error() {
		// Standard codes mean the provider evaluated and refused the grant; only extension
		// codes are treated as endpoint anomalies.
		BasicErrorResponseType::Extension(_) => ExchangeError::TokenEndpoint {
			message: format!("Token endpoint returned an OAuth error: {reason}"),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		},
		_ => ExchangeError::Rejected { reason },
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> ExchangeError {
	if err.is_timeout() {
		return ExchangeError::TokenEndpoint {
			message: "Request timed out while calling the token endpoint".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		};
	}

	ExchangeError::from(err)
}

fn map_generic_transport_error(
	meta: Option<&ResponseMetadata>,
	message: impl Display,
) -> ExchangeError {
	ExchangeError::TokenEndpoint {
		message: format!("HTTP client error occurred while calling the token endpoint: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
}

fn map_unknown_transport_error(meta: Option<&ResponseMetadata>) -> ExchangeError {
	ExchangeError::TokenEndpoint {
		message: "HTTP client error occurred while calling the token endpoint".into(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::StandardErrorResponse;
	// self
	use super::*;
	use crate::credential::ClientId;

	fn identity() -> ResolvedIdentity {
		ResolvedIdentity {
			tenant_id: TenantId::new("tenant1").expect("Tenant fixture should be valid."),
			client_id: ClientId::new("client1").expect("Client fixture should be valid."),
			username: "alice".into(),
			password: SecretString::new("secretpw"),
		}
	}

	#[test]
	fn token_endpoint_appends_tenant_path() {
		let authority = Url::parse("https://login.microsoftonline.com")
			.expect("Authority fixture should parse.");
		let tenant = TenantId::new("tenant1").expect("Tenant fixture should be valid.");
		let endpoint =
			token_endpoint(&authority, &tenant).expect("Token endpoint should build successfully.");

		assert_eq!(
			endpoint.as_str(),
			"https://login.microsoftonline.com/tenant1/oauth2/v2.0/token",
		);

		let trailing = Url::parse("https://login.example.com/")
			.expect("Trailing-slash authority fixture should parse.");
		let endpoint = token_endpoint(&trailing, &tenant)
			.expect("Trailing slashes should not double up in the path.");

		assert_eq!(endpoint.as_str(), "https://login.example.com/tenant1/oauth2/v2.0/token");
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn exchanger_debug_redacts_owner_credentials() {
		let exchanger = <ReqwestPasswordGrantExchanger>::from_identity(
			identity(),
			"api://model/.default",
			&Url::parse("https://login.example.com").expect("Authority fixture should parse."),
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.expect("Exchanger should build from a valid identity.");
		let rendered = format!("{exchanger:?}");

		assert!(!rendered.contains("alice"));
		assert!(!rendered.contains("secretpw"));
	}

	#[test]
	fn oversized_expires_in_maps_to_out_of_range() {
		let response: FacadeTokenResponse = serde_json::from_str(
			"{\"access_token\":\"tok\",\"token_type\":\"bearer\",\"expires_in\":9223372036854775807}",
		)
		.expect("Token response fixture should deserialize.");
		let err = map_password_token_response(response)
			.expect_err("A lifetime beyond the datetime range must be rejected.");

		assert!(matches!(err, ExchangeError::ExpiresInOutOfRange));
	}

	#[test]
	fn server_rejections_map_to_rejected() {
		let response = StandardErrorResponse::new(
			BasicErrorResponseType::InvalidGrant,
			Some("AADSTS50126: invalid username or password".into()),
			None,
		);
		let mapped = map_server_response_error(response, None);

		assert!(matches!(
			mapped,
			ExchangeError::Rejected { ref reason } if reason.contains("AADSTS50126"),
		));
	}

	#[test]
	fn extension_error_codes_map_to_endpoint_anomalies() {
		let response = StandardErrorResponse::new(
			BasicErrorResponseType::Extension("temporarily_unavailable".into()),
			None,
			None,
		);
		let mapped = map_server_response_error(
			response,
			Some(&ResponseMetadata { status: Some(503), retry_after: None }),
		);

		assert!(matches!(mapped, ExchangeError::TokenEndpoint { status: Some(503), .. }));
	}
}
