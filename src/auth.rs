use crate::config::{persist_env_value, WmsConfig, TOKEN_KEY};
use crate::error::PipelineError;
use crate::types::Credential;
use crate::wms::WmsClient;
use log::{info, warn};
use std::path::PathBuf;

/// Produces an authenticated [`Credential`], reusing a stored token when the API still
/// accepts it.
pub struct TokenProvider {
    client: WmsClient,
    credential: Credential,
    env_file: Option<PathBuf>,
}

impl TokenProvider {
    pub fn new(client: WmsClient, config: &WmsConfig) -> Self {
        Self {
            client,
            credential: Credential {
                username: config.username.clone(),
                password: config.password.clone(),
                system_id: config.system_id.clone(),
                token: config.token.clone(),
            },
            env_file: None,
        }
    }

    /// Persist freshly issued tokens to this env file for later runs.
    pub fn persist_to(mut self, env_file: PathBuf) -> Self {
        self.env_file = Some(env_file);
        self
    }

    pub async fn obtain_credential(&self) -> Result<Credential, PipelineError> {
        if let Some(token) = &self.credential.token {
            match self.client.validate_token(token).await {
                Ok(true) => {
                    info!("Stored token is valid, reusing it");
                    return Ok(self.credential.clone());
                }
                Ok(false) => warn!("Stored token was rejected, logging in again"),
                Err(e) => warn!("Token check failed ({}), logging in again", e),
            }
        }

        let token = self.client.login(&self.credential).await?;
        info!("Logged in as {}", self.credential.username);

        if let Some(path) = &self.env_file {
            if let Err(e) = persist_env_value(path, TOKEN_KEY, &token).await {
                warn!("Could not persist token to {}: {}", path.display(), e);
            }
        }

        Ok(Credential {
            token: Some(token),
            ..self.credential.clone()
        })
    }
}
