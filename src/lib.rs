//! Turn stored model-connection credentials into a renewable OAuth 2.0 resource-owner-password
//! bearer-token source with in-memory caching, refresh skew, and request coalescing.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod connect;
pub mod credential;
pub mod error;
pub mod exchange;
pub mod http;
pub mod obs;
pub mod provider;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience fixtures for integration tests; enabled via `cfg(test)` or the `test` crate
	//! feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		connect::{ConnectionSettings, NodeContext},
		credential::CredentialRecord,
	};

	/// Builds a compound-encoded credential record fixture.
	pub fn compound_record(endpoint: &str) -> CredentialRecord {
		CredentialRecord {
			api_key: Some("alice|secretpw".into()),
			resource_name: Some("tenant1|client1".into()),
			api_version: Some("2024-01-01".into()),
			endpoint: Some(endpoint.into()),
		}
	}

	/// Connection settings aimed at a mock token authority.
	pub fn test_settings(authority: &str) -> ConnectionSettings {
		ConnectionSettings::entra().with_authority(
			Url::parse(authority).expect("Mock authority URL should parse successfully."),
		)
	}

	/// Node context fixture carrying an explicit identity marker.
	pub fn test_node_context() -> NodeContext {
		NodeContext::new("Model Node", "alice")
	}
}

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {httpmock as _, tokio as _};
