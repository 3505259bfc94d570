use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use tracing::warn;

use crate::directory::Identity;
use crate::observability;

/// The login user is the acting party. A party with its own password in the
/// directory must use it; everyone else uses the shared server password.
pub struct RoadstayAuthSource {
    identity: Arc<dyn Identity>,
    shared_password: String,
}

impl RoadstayAuthSource {
    pub fn new(identity: Arc<dyn Identity>, shared_password: String) -> Self {
        Self {
            identity,
            shared_password,
        }
    }
}

impl fmt::Debug for RoadstayAuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoadstayAuthSource")
            .field("shared_password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthSource for RoadstayAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let Some(user) = login.user() else {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                "user name required".into(),
            ))));
        };
        let password = match self.identity.password(user).await {
            Ok(Some(own)) => own,
            Ok(None) => self.shared_password.clone(),
            Err(e) => {
                warn!("password lookup for {user} failed: {e}");
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "58000".into(),
                    "identity service unavailable".into(),
                ))));
            }
        };
        Ok(Password::new(None, password.into_bytes()))
    }
}
