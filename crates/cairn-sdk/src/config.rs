//! Replica configuration.

use crate::transport::ReplicaId;

/// Configuration for a replica.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// Identity used as the origin of published envelopes.
    pub replica_id: ReplicaId,
    /// Buffered envelopes per subscription.
    pub channel_capacity: usize,
    /// Maximum events per published envelope.
    pub publish_batch_size: usize,
    /// Validate events before reducing them locally.
    pub validate: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            replica_id: ReplicaId::generate(),
            channel_capacity: 256,
            publish_batch_size: 100,
            validate: true,
        }
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicaConfig::default(),
        }
    }

    pub fn replica_id(mut self, id: impl Into<String>) -> Self {
        self.config.replica_id = ReplicaId::new(id);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    pub fn publish_batch_size(mut self, size: usize) -> Self {
        self.config.publish_batch_size = size.max(1);
        self
    }

    pub fn validate(mut self, enabled: bool) -> Self {
        self.config.validate = enabled;
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

impl Default for ReplicaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
