//! Inbound credential-setup entry point and the connection config handed to HTTP clients.
//!
//! The workflow layer calls [`setup_model_connection`] with an opaque credential name, a
//! [`NodeContext`], and [`ConnectionSettings`]. The stored record is fetched through the
//! [`CredentialSource`] seam, resolved once, and turned into a [`ModelConnectionConfig`]
//! whose token provider the downstream HTTP client invokes before every outbound request.
//! Retry-on-401 and header attachment belong to that client, not to this crate.

// self
use crate::{
	_prelude::*,
	credential::{CredentialRecord, CredentialResolver, ResolvedCredential, ResolverSettings},
	error::{BoxError, ConfigError},
	exchange::{PasswordGrantExchanger, TransportErrorMapper},
	http::TokenHttpClient,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{BearerTokenSource, DEFAULT_REFRESH_SKEW, TokenProvider},
};
#[cfg(feature = "reqwest")]
use crate::{exchange::ReqwestTransportErrorMapper, http::ReqwestHttpClient};

/// Permission audience requested for model endpoint tokens.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";
/// Default identity authority tokens are minted against.
pub const ENTRA_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Boxed future returned by [`CredentialSource::fetch`].
pub type CredentialRecordFuture<'a> =
	Pin<Box<dyn Future<Output = Result<CredentialRecord, BoxError>> + 'a + Send>>;

/// External credential storage seam.
///
/// The persistence format and any at-rest encryption are owned by the external credential
/// subsystem; this crate only consumes the decoded record.
pub trait CredentialSource: Send + Sync {
	/// Fetches the stored record registered under the opaque `name`.
	fn fetch<'a>(&'a self, name: &'a str) -> CredentialRecordFuture<'a>;
}

/// Caller context for a credential-setup invocation.
#[derive(Clone, Debug)]
pub struct NodeContext {
	/// Node reference used when wrapping errors for user-facing display.
	pub node: String,
	/// Execution-context identity marker used to template legacy usernames; supplied
	/// explicitly instead of being read from the ambient environment.
	pub local_user: String,
}
impl NodeContext {
	/// Creates a context for the provided node reference and identity marker.
	pub fn new(node: impl Into<String>, local_user: impl Into<String>) -> Self {
		Self { node: node.into(), local_user: local_user.into() }
	}
}

/// Deployment-level settings for credential setup.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
	/// Identity authority base URL; the tenant path is appended per identity.
	pub authority: Url,
	/// Fixed scope identifying the target API's permission audience.
	pub scope: String,
	/// Refresh skew applied by the token provider.
	pub refresh_skew: Duration,
	/// Credential resolver settings.
	pub resolver: ResolverSettings,
}
impl ConnectionSettings {
	/// Settings for the default Entra authority and model endpoint scope.
	pub fn entra() -> Self {
		Self {
			authority: Url::parse(ENTRA_AUTHORITY).expect("Static authority URL should parse."),
			scope: COGNITIVE_SERVICES_SCOPE.into(),
			refresh_skew: DEFAULT_REFRESH_SKEW,
			resolver: ResolverSettings::default(),
		}
	}

	/// Overrides the identity authority.
	pub fn with_authority(mut self, authority: Url) -> Self {
		self.authority = authority;

		self
	}

	/// Overrides the requested scope.
	pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = scope.into();

		self
	}

	/// Overrides the token provider's refresh skew.
	pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
		self.refresh_skew = skew;

		self
	}

	/// Overrides the resolver settings.
	pub fn with_resolver(mut self, resolver: ResolverSettings) -> Self {
		self.resolver = resolver;

		self
	}
}
impl Default for ConnectionSettings {
	fn default() -> Self {
		Self::entra()
	}
}

/// Connection config handed to the downstream model HTTP client.
///
/// `token_provider` is a capability, not a value; the client calls it before each request and
/// attaches the result as an `Authorization: Bearer` header. The remaining fields are plain
/// metadata copied through from the stored record.
pub struct ModelConnectionConfig {
	/// Renewable bearer-token capability.
	pub token_provider: Arc<dyn BearerTokenSource>,
	/// Deployment instance name; `None` for compound-encoded records, which must supply
	/// `endpoint` instead.
	pub instance_name: Option<String>,
	/// Target API version.
	pub api_version: String,
	/// Optional endpoint URL.
	pub endpoint: Option<Url>,
}
impl Debug for ModelConnectionConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ModelConnectionConfig")
			.field("instance_name", &self.instance_name)
			.field("api_version", &self.api_version)
			.field("endpoint", &self.endpoint)
			.finish()
	}
}

/// Resolves a raw record and builds the token-provider-backed connection config.
///
/// This is the synchronous core of credential setup: no network traffic happens here, the
/// first exchange is deferred until the provider is invoked.
pub fn connection_from_record<C, M>(
	record: &CredentialRecord,
	ctx: &NodeContext,
	settings: &ConnectionSettings,
	http_client: impl Into<Arc<C>>,
	error_mapper: impl Into<Arc<M>>,
) -> Result<ModelConnectionConfig>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let resolver = CredentialResolver::new(settings.resolver.clone());
	let ResolvedCredential { identity, instance_name, api_version, endpoint } =
		resolver.resolve(record, &ctx.local_user)?;
	let exchanger = PasswordGrantExchanger::from_identity(
		identity,
		settings.scope.clone(),
		&settings.authority,
		http_client,
		error_mapper,
	)?;
	let provider = TokenProvider::new(exchanger).with_refresh_skew(settings.refresh_skew);

	Ok(ModelConnectionConfig {
		token_provider: Arc::new(provider),
		instance_name,
		api_version,
		endpoint,
	})
}

/// Fetches the named record and sets up the connection with a caller-provided transport.
///
/// Failures are wrapped with the node reference from `ctx` so the workflow layer can surface
/// a user-actionable error; the original cause stays attached as the error source.
pub async fn setup_model_connection_with<C, M>(
	source: &dyn CredentialSource,
	credential_name: &str,
	ctx: &NodeContext,
	settings: &ConnectionSettings,
	http_client: impl Into<Arc<C>>,
	error_mapper: impl Into<Arc<M>>,
) -> Result<ModelConnectionConfig>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	const KIND: FlowKind = FlowKind::Resolve;

	let span = FlowSpan::new(KIND, "setup_model_connection");

	obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

	let result = span
		.instrument(async move {
			let record = source
				.fetch(credential_name)
				.await
				.map_err(|err| Error::from(ConfigError::CredentialFetch { source: err }))?;

			connection_from_record(&record, ctx, settings, http_client, error_mapper)
		})
		.await;

	match &result {
		Ok(_) => {
			obs::record_flow_outcome(KIND, FlowOutcome::Success);

			#[cfg(feature = "tracing")]
			tracing::debug!(node = %ctx.node, "Model connection token provider created.");
		},
		Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
	}

	result.map_err(|err| err.for_node(&ctx.node))
}

/// Fetches the named record and sets up the connection using the default reqwest transport.
#[cfg(feature = "reqwest")]
pub async fn setup_model_connection(
	source: &dyn CredentialSource,
	credential_name: &str,
	ctx: &NodeContext,
	settings: &ConnectionSettings,
) -> Result<ModelConnectionConfig> {
	// Passing the mapper by value keeps the `Into<Arc<M>>` conversion unique so `M` infers.
	setup_model_connection_with(
		source,
		credential_name,
		ctx,
		settings,
		ReqwestHttpClient::default(),
		ReqwestTransportErrorMapper,
	)
	.await
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn entra_settings_carry_the_fixed_scope_and_skew() {
		let settings = ConnectionSettings::entra();

		assert_eq!(settings.scope, COGNITIVE_SERVICES_SCOPE);
		assert_eq!(settings.refresh_skew, DEFAULT_REFRESH_SKEW);
		assert_eq!(settings.authority.as_str(), "https://login.microsoftonline.com/");
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn connection_config_debug_omits_the_token_capability() {
		let record = CredentialRecord {
			api_key: Some("alice|secretpw".into()),
			resource_name: Some("tenant1|client1".into()),
			api_version: Some("2024-01-01".into()),
			endpoint: Some("https://x".into()),
		};
		let config = connection_from_record(
			&record,
			&NodeContext::new("Model Node", "alice"),
			&ConnectionSettings::entra(),
			ReqwestHttpClient::default(),
			ReqwestTransportErrorMapper,
		)
		.expect("Compound record should produce a connection config.");
		let rendered = format!("{config:?}");

		assert!(rendered.contains("2024-01-01"));
		assert!(!rendered.contains("secretpw"));
		assert_eq!(config.instance_name, None);
	}
}
