use async_trait::async_trait;

use super::Generator;
use crate::{error::Result, types::UpstreamApplicationMap};

pub const NULL_CONFIG: &str = "dummy-config";

/// Produces a fixed placeholder and never restarts anything. Used for dry runs.
#[derive(Debug, Clone, Default)]
pub struct NullGenerator;

#[async_trait]
impl Generator for NullGenerator {
    fn generate_config(&self, _upstreams: &UpstreamApplicationMap) -> Result<String> {
        Ok(NULL_CONFIG.to_string())
    }

    async fn handle_restart(&self) -> Result<()> {
        Ok(())
    }
}
