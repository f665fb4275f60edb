//! Raw credential records and the identity they resolve into.

// self
use crate::{
	_prelude::*,
	credential::{ClientId, SecretString, TenantId},
};

/// Field classes referenced by configuration errors.
///
/// Error paths name the offending field class abstractly instead of echoing its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CredentialField {
	/// The overloaded `apiKey` field (raw password or `username|password` pair).
	ApiKey,
	/// The overloaded `resourceName` field (deployment name or `tenantId|clientId` pair).
	ResourceName,
	/// The `apiVersion` field.
	ApiVersion,
	/// The caller-supplied identity marker used to template legacy usernames.
	LocalUser,
}
impl CredentialField {
	/// Returns a stable label suitable for error messages and log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialField::ApiKey => "apiKey",
			CredentialField::ResourceName => "resourceName",
			CredentialField::ApiVersion => "apiVersion",
			CredentialField::LocalUser => "localUser",
		}
	}
}
impl Display for CredentialField {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Weakly typed connection record as stored by the external credential subsystem.
///
/// `api_key` and `resource_name` are overloaded for backward compatibility; see
/// [`EncodingPolicy`](crate::credential::EncodingPolicy) for how a convention is selected.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
	/// Raw password (legacy) or `username|password` pair (compound).
	#[serde(default)]
	pub api_key: Option<String>,
	/// Deployment instance name (legacy) or `tenantId|clientId` pair (compound).
	#[serde(default)]
	pub resource_name: Option<String>,
	/// Target API version, copied through to the connection config.
	#[serde(default)]
	pub api_version: Option<String>,
	/// Optional endpoint URL overriding instance-name-based addressing.
	#[serde(default)]
	pub endpoint: Option<String>,
}
impl Debug for CredentialRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRecord")
			.field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
			.field("resource_name", &self.resource_name)
			.field("api_version", &self.api_version)
			.field("endpoint", &self.endpoint)
			.finish()
	}
}

/// The four secrets required to perform a resource-owner-password exchange.
///
/// Consumed exactly once by the exchanger; never persisted and never logged.
#[derive(Clone)]
pub struct ResolvedIdentity {
	/// Directory (tenant) identifier.
	pub tenant_id: TenantId,
	/// Application (client) identifier.
	pub client_id: ClientId,
	/// Resource-owner username.
	pub username: String,
	/// Resource-owner password.
	pub password: SecretString,
}
impl Debug for ResolvedIdentity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResolvedIdentity")
			.field("tenant_id", &self.tenant_id)
			.field("client_id", &self.client_id)
			.field("username", &"<redacted>")
			.field("password", &"<redacted>")
			.finish()
	}
}

/// Resolver output: the exchange identity plus endpoint metadata copied through unchanged.
#[derive(Clone, Debug)]
pub struct ResolvedCredential {
	/// Identity consumed by the token exchange.
	pub identity: ResolvedIdentity,
	/// Deployment instance name; only available under the legacy encoding.
	pub instance_name: Option<String>,
	/// Target API version.
	pub api_version: String,
	/// Optional endpoint URL.
	pub endpoint: Option<Url>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_deserializes_camel_case_fields() {
		let record: CredentialRecord = serde_json::from_str(
			"{\"apiKey\":\"alice|secretpw\",\"resourceName\":\"tenant1|client1\",\
			 \"apiVersion\":\"2024-01-01\",\"endpoint\":\"https://x\"}",
		)
		.expect("Record JSON should deserialize successfully.");

		assert_eq!(record.api_key.as_deref(), Some("alice|secretpw"));
		assert_eq!(record.resource_name.as_deref(), Some("tenant1|client1"));
		assert_eq!(record.api_version.as_deref(), Some("2024-01-01"));
		assert_eq!(record.endpoint.as_deref(), Some("https://x"));
	}

	#[test]
	fn record_debug_redacts_api_key() {
		let record = CredentialRecord { api_key: Some("secret".into()), ..Default::default() };
		let rendered = format!("{record:?}");

		assert!(rendered.contains("<redacted>"));
		assert!(!rendered.contains("secret"));
	}

	#[test]
	fn identity_debug_redacts_owner_credentials() {
		let identity = ResolvedIdentity {
			tenant_id: TenantId::new("tenant1").expect("Tenant fixture should be valid."),
			client_id: ClientId::new("client1").expect("Client fixture should be valid."),
			username: "alice".into(),
			password: SecretString::new("secretpw"),
		};
		let rendered = format!("{identity:?}");

		assert!(rendered.contains("tenant1"));
		assert!(!rendered.contains("alice"));
		assert!(!rendered.contains("secretpw"));
	}
}
