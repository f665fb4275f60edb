//! Bearer-token provisioning with caching, refresh skew, and request coalescing.
//!
//! A [`TokenProvider`] wraps one [`TokenExchange`] and hands out bearer tokens on demand. A
//! fresh cached token is returned without suspension; once the cache is empty or inside the
//! refresh-skew window, callers funnel through a singleflight guard so exactly one exchange is
//! in flight at a time. Every caller that coalesced on an exchange observes the same outcome:
//! the same token value or the same shared error. Failures evict the cache so a stale token is
//! never returned in place of an error, and the next non-coalesced call retries fresh.

// self
use crate::{
	_prelude::*,
	credential::SecretString,
	error::AuthError,
	exchange::{IssuedToken, TokenExchange},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Safety margin subtracted from a token's expiry; renewal starts once the remaining lifetime
/// drops below it, so a token never expires mid-flight-request.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::seconds(180);

/// Boxed future returned by [`BearerTokenSource::bearer_token`].
pub type BearerTokenFuture<'a> = Pin<Box<dyn Future<Output = Result<SecretString>> + 'a + Send>>;

/// Capability handed to the HTTP client layer: yields a valid bearer token before each
/// outbound request.
pub trait BearerTokenSource: Send + Sync {
	/// Returns a currently valid bearer token, performing an exchange when necessary.
	fn bearer_token(&self) -> BearerTokenFuture<'_>;
}

/// Cached token owned exclusively by one provider; replaced wholesale on refresh.
struct CachedToken {
	secret: SecretString,
	expires_at: OffsetDateTime,
}
impl CachedToken {
	fn is_fresh(&self, now: OffsetDateTime, skew: Duration) -> bool {
		now < self.expires_at - skew
	}
}
impl From<IssuedToken> for CachedToken {
	fn from(issued: IssuedToken) -> Self {
		Self { secret: issued.secret, expires_at: issued.expires_at }
	}
}

#[derive(Default)]
struct ProviderState {
	cached: Option<CachedToken>,
	/// Incremented once per completed exchange; waiters compare it against the value they
	/// observed before blocking to detect an exchange that completed while they waited.
	epoch: u64,
	last_failure: Option<(u64, AuthError)>,
	closed: bool,
}

/// Renewable bearer-token source for the lifetime of one model connection.
pub struct TokenProvider<X>
where
	X: ?Sized + TokenExchange,
{
	exchange: Arc<X>,
	refresh_skew: Duration,
	state: Mutex<ProviderState>,
	flight: AsyncMutex<()>,
}
impl<X> TokenProvider<X>
where
	X: ?Sized + TokenExchange,
{
	/// Creates a provider around the given exchange with the default refresh skew.
	pub fn new(exchange: impl Into<Arc<X>>) -> Self {
		Self {
			exchange: exchange.into(),
			refresh_skew: DEFAULT_REFRESH_SKEW,
			state: Mutex::new(ProviderState::default()),
			flight: AsyncMutex::new(()),
		}
	}

	/// Overrides the refresh skew; negative values clamp to zero.
	pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
		self.refresh_skew = if skew.is_negative() { Duration::ZERO } else { skew };

		self
	}

	/// Marks the provider closed and evicts the cache; later callers receive
	/// [`AuthError::Cancelled`] instead of hanging on an orphaned refresh.
	pub fn close(&self) {
		let mut state = self.state.lock();

		state.closed = true;
		state.cached = None;
	}

	/// Returns `true` once [`close`](Self::close) has been called.
	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// Returns a valid bearer token, exchanging credentials when the cache is empty or inside
	/// the refresh-skew window.
	pub async fn acquire(&self) -> Result<SecretString> {
		let observed = {
			let state = self.state.lock();

			if state.closed {
				return Err(AuthError::Cancelled.into());
			}
			if let Some(secret) = fresh_secret(&state, self.refresh_skew) {
				return Ok(secret);
			}

			state.epoch
		};

		self.refresh(observed).await
	}

	async fn refresh(&self, observed: u64) -> Result<SecretString> {
		const KIND: FlowKind = FlowKind::Exchange;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let _singleflight = self.flight.lock().await;

				{
					let state = self.state.lock();

					if state.closed {
						return Err(AuthError::Cancelled.into());
					}
					if let Some(secret) = fresh_secret(&state, self.refresh_skew) {
						return Ok(secret);
					}
					if state.epoch > observed {
						if let Some((epoch, failure)) = &state.last_failure {
							if *epoch > observed {
								// The exchange this caller coalesced on already failed;
								// propagate the same outcome instead of stampeding the
								// identity provider.
								return Err(failure.clone().into());
							}
						}
					}
				}

				// Only the singleflight guard is held across the await; the state lock is
				// never held while suspended.
				let outcome = self.exchange.exchange_token().await;
				let mut state = self.state.lock();

				state.epoch += 1;

				match outcome {
					Ok(issued) => {
						if state.closed {
							return Err(AuthError::Cancelled.into());
						}

						let secret = issued.secret.clone();

						state.cached = Some(CachedToken::from(issued));
						state.last_failure = None;

						Ok(secret)
					},
					Err(cause) => {
						let failure = AuthError::exchange_failed(cause);

						state.cached = None;
						state.last_failure = Some((state.epoch, failure.clone()));

						Err(failure.into())
					},
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}
impl<X> BearerTokenSource for TokenProvider<X>
where
	X: ?Sized + TokenExchange,
{
	fn bearer_token(&self) -> BearerTokenFuture<'_> {
		Box::pin(self.acquire())
	}
}
impl<X> Debug for TokenProvider<X>
where
	X: ?Sized + TokenExchange,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("TokenProvider")
			.field("refresh_skew", &self.refresh_skew)
			.field("cached", &state.cached.as_ref().map(|token| token.expires_at))
			.field("closed", &state.closed)
			.finish()
	}
}

fn fresh_secret(state: &ProviderState, skew: Duration) -> Option<SecretString> {
	state
		.cached
		.as_ref()
		.filter(|token| token.is_fresh(OffsetDateTime::now_utc(), skew))
		.map(|token| token.secret.clone())
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn cache_freshness_respects_the_skew_window() {
		let token = CachedToken {
			secret: SecretString::new("token"),
			expires_at: macros::datetime!(2025-01-01 01:00 UTC),
		};
		let skew = Duration::seconds(180);

		assert!(token.is_fresh(macros::datetime!(2025-01-01 00:00 UTC), skew));
		// At exactly expires_at - skew the token counts as due for renewal.
		assert!(!token.is_fresh(macros::datetime!(2025-01-01 00:57 UTC), skew));
		assert!(!token.is_fresh(macros::datetime!(2025-01-01 01:00 UTC), skew));
	}

	#[test]
	fn zero_skew_keeps_tokens_until_expiry() {
		let token = CachedToken {
			secret: SecretString::new("token"),
			expires_at: macros::datetime!(2025-01-01 01:00 UTC),
		};

		assert!(token.is_fresh(macros::datetime!(2025-01-01 00:59:59 UTC), Duration::ZERO));
		assert!(!token.is_fresh(macros::datetime!(2025-01-01 01:00 UTC), Duration::ZERO));
	}
}
