//! Tunables for chunk derivation and pipeline scheduling.

use crate::types::RagError;

/// Controls how section bodies are cut into retrieval units.
///
/// Chunks never span a section boundary; these knobs only govern how an
/// oversized section is sub-split.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target ceiling on chunk size in characters. A section body above
    /// this is split at sentence boundaries; a finished sub-chunk may run
    /// over by at most `chunk_overlap_chars`.
    pub max_chunk_chars: usize,
    /// Characters carried over from the end of one sub-chunk into the next,
    /// so retrieval keeps cross-boundary context.
    pub chunk_overlap_chars: usize,
    /// Section bodies shorter than this after trimming produce no chunk.
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1600,
            chunk_overlap_chars: 200,
            min_chunk_chars: 1,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.max_chunk_chars == 0 {
            return Err(RagError::Config(
                "max_chunk_chars must be positive".to_string(),
            ));
        }
        if self.chunk_overlap_chars >= self.max_chunk_chars {
            return Err(RagError::Config(format!(
                "chunk_overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                self.chunk_overlap_chars, self.max_chunk_chars
            )));
        }
        Ok(())
    }
}

/// Scheduling knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on documents processed concurrently.
    pub parallelism: usize,
    pub chunking: ChunkingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            chunking: ChunkingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.parallelism == 0 {
            return Err(RagError::Config(
                "parallelism must be at least 1".to_string(),
            ));
        }
        self.chunking.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_validate() {
        assert!(ChunkingConfig::default().validate().is_ok());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_stay_below_max() {
        let config = ChunkingConfig {
            max_chunk_chars: 100,
            chunk_overlap_chars: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let config = PipelineConfig {
            parallelism: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }
}
