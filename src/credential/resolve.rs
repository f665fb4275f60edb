//! Deterministic resolution of raw records into an exchange-ready identity.
//!
//! Two encoding conventions are supported for backward compatibility: the compound convention
//! packs `tenantId|clientId` into `resourceName` and `username|password` into `apiKey`, while
//! the legacy convention reads fixed deployment identifiers from [`LegacySettings`] and
//! templates the username from a caller-supplied identity marker. The active convention is an
//! explicit configuration choice; structural detection is only a fallback policy.

// self
use crate::{
	_prelude::*,
	credential::{
		ClientId, CredentialField, CredentialRecord, ResolvedCredential, ResolvedIdentity,
		SecretString, TenantId,
	},
	error::ConfigError,
};

const SEPARATOR: char = '|';

/// Encoding convention used by a credential record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialEncoding {
	/// `resourceName` and `apiKey` each carry a `|`-separated pair.
	Compound,
	/// Identifiers come from deployment settings; `apiKey` is the raw password.
	Legacy,
}

/// Policy selecting the active encoding convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingPolicy {
	/// The convention is fixed at configuration time; field shapes are never sniffed.
	Explicit(CredentialEncoding),
	/// Prefer the compound convention when a `|` separator is present, legacy otherwise.
	#[default]
	Detect,
}

/// Injectable deployment configuration backing the legacy encoding.
///
/// These values are environment-specific and secrets-adjacent; they are never compiled in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LegacySettings {
	/// Fixed directory (tenant) identifier.
	pub tenant_id: TenantId,
	/// Fixed application (client) identifier.
	pub client_id: ClientId,
	/// Domain appended to the identity marker when templating usernames.
	pub username_domain: String,
}
impl LegacySettings {
	/// Creates legacy settings for the provided deployment identifiers.
	pub fn new(tenant_id: TenantId, client_id: ClientId, username_domain: impl Into<String>) -> Self {
		Self { tenant_id, client_id, username_domain: username_domain.into() }
	}
}

/// Resolver configuration.
#[derive(Clone, Debug, Default)]
pub struct ResolverSettings {
	/// Active encoding policy.
	pub encoding: EncodingPolicy,
	/// Legacy deployment settings; required whenever the legacy convention is selected.
	pub legacy: Option<LegacySettings>,
}
impl ResolverSettings {
	/// Overrides the encoding policy.
	pub fn with_encoding(mut self, encoding: EncodingPolicy) -> Self {
		self.encoding = encoding;

		self
	}

	/// Supplies the legacy deployment settings.
	pub fn with_legacy(mut self, legacy: LegacySettings) -> Self {
		self.legacy = Some(legacy);

		self
	}
}

/// Resolves raw credential records into [`ResolvedCredential`] values.
///
/// Resolution fails closed: any ambiguity under the selected convention is an error, never a
/// silent default, and error paths never echo credential values.
#[derive(Clone, Debug)]
pub struct CredentialResolver {
	settings: ResolverSettings,
}
impl CredentialResolver {
	/// Creates a resolver with the provided settings.
	pub fn new(settings: ResolverSettings) -> Self {
		Self { settings }
	}

	/// Resolves `record` into an exchange identity plus endpoint metadata.
	///
	/// `local_user` is the system-supplied identity marker used to template legacy usernames;
	/// it is an explicit parameter rather than an ambient environment lookup.
	pub fn resolve(
		&self,
		record: &CredentialRecord,
		local_user: &str,
	) -> Result<ResolvedCredential, ConfigError> {
		let encoding = self.select_encoding(record);
		let api_version = required(&record.api_version, CredentialField::ApiVersion)?.to_owned();
		let endpoint = record
			.endpoint
			.as_deref()
			.filter(|value| !value.is_empty())
			.map(Url::parse)
			.transpose()
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let (identity, instance_name) = match encoding {
			CredentialEncoding::Compound => (self.resolve_compound(record)?, None),
			CredentialEncoding::Legacy => {
				let instance =
					required(&record.resource_name, CredentialField::ResourceName)?.to_owned();

				(self.resolve_legacy(record, local_user)?, Some(instance))
			},
		};

		#[cfg(feature = "tracing")]
		tracing::debug!(encoding = ?encoding, "Resolved credential record.");

		Ok(ResolvedCredential { identity, instance_name, api_version, endpoint })
	}

	fn select_encoding(&self, record: &CredentialRecord) -> CredentialEncoding {
		match self.settings.encoding {
			EncodingPolicy::Explicit(encoding) => encoding,
			EncodingPolicy::Detect =>
				if has_separator(&record.resource_name) || has_separator(&record.api_key) {
					CredentialEncoding::Compound
				} else {
					CredentialEncoding::Legacy
				},
		}
	}

	fn resolve_compound(&self, record: &CredentialRecord) -> Result<ResolvedIdentity, ConfigError> {
		let resource = required(&record.resource_name, CredentialField::ResourceName)?;
		let key = required(&record.api_key, CredentialField::ApiKey)?;
		let (tenant, client) = split_pair(resource, CredentialField::ResourceName)?;
		let (username, password) = split_pair(key, CredentialField::ApiKey)?;

		Ok(ResolvedIdentity {
			tenant_id: TenantId::new(tenant)?,
			client_id: ClientId::new(client)?,
			username: username.to_owned(),
			password: SecretString::new(password),
		})
	}

	fn resolve_legacy(
		&self,
		record: &CredentialRecord,
		local_user: &str,
	) -> Result<ResolvedIdentity, ConfigError> {
		let legacy = self.settings.legacy.as_ref().ok_or(ConfigError::MissingLegacySettings)?;
		let password = required(&record.api_key, CredentialField::ApiKey)?;

		if local_user.is_empty() {
			return Err(ConfigError::MissingField { field: CredentialField::LocalUser });
		}

		Ok(ResolvedIdentity {
			tenant_id: legacy.tenant_id.clone(),
			client_id: legacy.client_id.clone(),
			username: format!("{local_user}@{}", legacy.username_domain),
			password: SecretString::new(password),
		})
	}
}

fn has_separator(value: &Option<String>) -> bool {
	value.as_deref().is_some_and(|view| view.contains(SEPARATOR))
}

fn required<'r>(
	value: &'r Option<String>,
	field: CredentialField,
) -> Result<&'r str, ConfigError> {
	value
		.as_deref()
		.filter(|view| !view.is_empty())
		.ok_or(ConfigError::MissingField { field })
}

fn split_pair(value: &str, field: CredentialField) -> Result<(&str, &str), ConfigError> {
	let mut parts = value.split(SEPARATOR);

	match (parts.next(), parts.next(), parts.next()) {
		(Some(first), Some(second), None) if !first.is_empty() && !second.is_empty() =>
			Ok((first, second)),
		_ => Err(ConfigError::MalformedField { field }),
	}
}
