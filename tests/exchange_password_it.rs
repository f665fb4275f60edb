#![cfg(feature = "reqwest")]

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
// self
use ropc_token_source::{
	connect::{self, ConnectionSettings, CredentialRecordFuture, CredentialSource, NodeContext},
	credential::{ClientId, CredentialRecord, ResolvedIdentity, SecretString, TenantId},
	error::{AuthError, ConfigError, Error, ExchangeError},
	exchange::{ReqwestPasswordGrantExchanger, ReqwestTransportErrorMapper, TokenExchange},
	http::ReqwestHttpClient,
	url::Url,
};

const SCOPE: &str = "api://model/.default";

/// Credential store double that serves a single named record.
struct SingleRecordSource {
	name: &'static str,
	record: CredentialRecord,
}
impl CredentialSource for SingleRecordSource {
	fn fetch<'a>(&'a self, name: &'a str) -> CredentialRecordFuture<'a> {
		Box::pin(async move {
			if name == self.name { Ok(self.record.clone()) } else { Err("unknown credential".into()) }
		})
	}
}

fn identity() -> ResolvedIdentity {
	ResolvedIdentity {
		tenant_id: TenantId::new("tenant1").expect("Tenant identifier should be valid."),
		client_id: ClientId::new("client1").expect("Client identifier should be valid."),
		username: "alice".into(),
		password: SecretString::new("secretpw"),
	}
}

fn build_exchanger(server: &MockServer) -> ReqwestPasswordGrantExchanger {
	<ReqwestPasswordGrantExchanger>::from_identity(
		identity(),
		SCOPE,
		&Url::parse(&server.base_url()).expect("Mock authority URL should parse successfully."),
		ReqwestHttpClient::default(),
		Arc::new(ReqwestTransportErrorMapper),
	)
	.expect("Exchanger should build from a valid identity.")
}

fn compound_record(endpoint: &str) -> CredentialRecord {
	CredentialRecord {
		api_key: Some("alice|secretpw".into()),
		resource_name: Some("tenant1|client1".into()),
		api_version: Some("2024-01-01".into()),
		endpoint: Some(endpoint.into()),
	}
}

#[tokio::test]
async fn password_grant_posts_the_owner_credentials_and_returns_the_token() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/tenant1/oauth2/v2.0/token")
				.body_includes("grant_type=password")
				.body_includes("username=alice")
				.body_includes("client_id=client1");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"tok-1\",\"token_type\":\"bearer\",\"expires_in\":3600}");
		})
		.await;
	let exchanger = build_exchanger(&server);
	let issued = exchanger.exchange_token().await.expect("Password exchange should succeed.");

	mock.assert_async().await;

	assert_eq!(issued.secret.expose(), "tok-1");
	assert!(issued.expires_at > issued.issued_at);
}

#[tokio::test]
async fn invalid_grant_responses_surface_the_provider_reason() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/tenant1/oauth2/v2.0/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(
					"{\"error\":\"invalid_grant\",\"error_description\":\"AADSTS50126: invalid username or password\"}",
				);
		})
		.await;
	let exchanger = build_exchanger(&server);
	let err = exchanger
		.exchange_token()
		.await
		.expect_err("A rejected grant must not produce a token.");

	mock.assert_async().await;

	assert!(matches!(
		err,
		ExchangeError::Rejected { ref reason } if reason.contains("AADSTS50126"),
	));
}

#[tokio::test]
async fn missing_expires_in_is_rejected_instead_of_cached_forever() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/tenant1/oauth2/v2.0/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"tok-1\",\"token_type\":\"bearer\"}");
		})
		.await;
	let exchanger = build_exchanger(&server);
	let err = exchanger
		.exchange_token()
		.await
		.expect_err("A response without a lifetime must be rejected.");

	assert!(matches!(err, ExchangeError::MissingExpiresIn));
}

#[tokio::test]
async fn setup_model_connection_yields_a_caching_token_provider() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/tenant1/oauth2/v2.0/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(
					"{\"access_token\":\"tok-e2e\",\"token_type\":\"bearer\",\"expires_in\":3600}",
				);
		})
		.await;
	let source = SingleRecordSource {
		name: "azure-model",
		record: compound_record("https://models.example.com"),
	};
	let settings = ConnectionSettings::entra().with_authority(
		Url::parse(&server.base_url()).expect("Mock authority URL should parse successfully."),
	);
	let ctx = NodeContext::new("Model Node", "alice");
	let config = connect::setup_model_connection(&source, "azure-model", &ctx, &settings)
		.await
		.expect("Connection setup should succeed for a valid compound record.");

	assert_eq!(config.api_version, "2024-01-01");
	assert_eq!(config.instance_name, None);
	assert_eq!(
		config.endpoint.as_ref().map(Url::as_str),
		Some("https://models.example.com/"),
	);

	let first = config
		.token_provider
		.bearer_token()
		.await
		.expect("First bearer token acquisition should succeed.");
	let second = config
		.token_provider
		.bearer_token()
		.await
		.expect("Second bearer token acquisition should hit the cache.");

	// Exactly one exchange backs both acquisitions.
	mock.assert_async().await;

	assert_eq!(first.expose(), "tok-e2e");
	assert_eq!(second.expose(), "tok-e2e");
}

#[tokio::test]
async fn unknown_credential_names_fail_with_the_node_reference() {
	let source = SingleRecordSource {
		name: "azure-model",
		record: compound_record("https://models.example.com"),
	};
	let settings = ConnectionSettings::entra();
	let ctx = NodeContext::new("Model Node", "alice");
	let err = connect::setup_model_connection(&source, "missing", &ctx, &settings)
		.await
		.expect_err("An unknown credential name must fail setup.");

	match err {
		Error::Setup { ref node, ref source } => {
			assert_eq!(node, "Model Node");
			assert!(matches!(**source, Error::Config(ConfigError::CredentialFetch { .. })));
		},
		other => panic!("Setup failures must carry the node reference, got {other:?}."),
	}
	assert!(format!("{err}").contains("Model Node"));
}

#[tokio::test]
async fn rejected_exchanges_surface_through_the_provider_as_auth_errors() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/tenant1/oauth2/v2.0/token");
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_grant\"}");
		})
		.await;
	let source = SingleRecordSource {
		name: "azure-model",
		record: compound_record("https://models.example.com"),
	};
	let settings = ConnectionSettings::entra().with_authority(
		Url::parse(&server.base_url()).expect("Mock authority URL should parse successfully."),
	);
	let ctx = NodeContext::new("Model Node", "alice");
	let config = connect::setup_model_connection(&source, "azure-model", &ctx, &settings)
		.await
		.expect("Setup performs no exchange, so a bad grant must not fail it.");
	let err = config
		.token_provider
		.bearer_token()
		.await
		.expect_err("The rejected grant must surface on first acquisition.");
	let rendered = format!("{err}");

	assert!(matches!(err, Error::Auth(AuthError::ExchangeFailed { .. })));
	// The stored secret never leaks through the error chain.
	assert!(!rendered.contains("secretpw"));
}

#[cfg(feature = "test")]
mod fixtures {
	// self
	use super::*;
	use ropc_token_source::_preludet;

	#[tokio::test]
	async fn bundled_fixtures_resolve_end_to_end() {
		let server = MockServer::start_async().await;
		let _mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/tenant1/oauth2/v2.0/token");
				then.status(200)
					.header("content-type", "application/json")
					.body(
						"{\"access_token\":\"tok-fixture\",\"token_type\":\"bearer\",\"expires_in\":3600}",
					);
			})
			.await;
		let source = SingleRecordSource {
			name: "azure-model",
			record: _preludet::compound_record("https://models.example.com"),
		};
		let settings = _preludet::test_settings(&server.base_url());
		let ctx = _preludet::test_node_context();
		let config = connect::setup_model_connection(&source, "azure-model", &ctx, &settings)
			.await
			.expect("Fixture-based setup should succeed.");
		let token = config
			.token_provider
			.bearer_token()
			.await
			.expect("Fixture-based acquisition should succeed.");

		assert_eq!(token.expose(), "tok-fixture");
	}
}
