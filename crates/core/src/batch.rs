//! Batch expansion: one template request into N independent requests.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::workflow::{resolve_seed, GenerationRequest};

/// Largest batch accepted in one call.
pub const MAX_BATCH_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedMode {
    /// Every item draws a fresh seed.
    #[default]
    Random,
    /// `base, base + 1, base + 2, ...`
    Sequential,
    /// Every item uses the same seed (useful with prompt variations).
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub template: GenerationRequest,
    pub count: usize,
    #[serde(default)]
    pub seed_mode: SeedMode,
    /// Prompts cycled across items; empty keeps the template prompt.
    #[serde(default)]
    pub prompt_variations: Vec<String>,
}

impl BatchPlan {
    /// Expand into `count` requests. The base seed is the template's seed,
    /// or a fresh one when absent.
    pub fn expand(&self) -> Result<Vec<GenerationRequest>, CoreError> {
        if self.count == 0 || self.count > MAX_BATCH_SIZE {
            return Err(CoreError::Validation(format!(
                "Batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.count
            )));
        }

        let base = resolve_seed(self.template.params.seed);
        let variations: Vec<&str> = self
            .prompt_variations
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();

        Ok((0..self.count)
            .map(|i| {
                let mut request = self.template.clone();
                request.params.seed = match self.seed_mode {
                    SeedMode::Random => None,
                    SeedMode::Sequential => Some(base.wrapping_add(i as u64)),
                    SeedMode::Fixed => Some(base),
                };
                if !variations.is_empty() {
                    request.params.prompt = variations[i % variations.len()].to_string();
                }
                request
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerationMode, MediaKind};

    fn plan(count: usize, seed_mode: SeedMode) -> BatchPlan {
        BatchPlan {
            template: GenerationRequest::new(MediaKind::Image, GenerationMode::Create, "sd15", "a cat")
                .with_seed(100),
            count,
            seed_mode,
            prompt_variations: vec![],
        }
    }

    #[test]
    fn sequential_seeds_count_up() {
        let seeds: Vec<_> = plan(3, SeedMode::Sequential)
            .expand()
            .unwrap()
            .iter()
            .map(|r| r.params.seed)
            .collect();
        assert_eq!(seeds, vec![Some(100), Some(101), Some(102)]);
    }

    #[test]
    fn fixed_seeds_repeat() {
        let reqs = plan(4, SeedMode::Fixed).expand().unwrap();
        assert!(reqs.iter().all(|r| r.params.seed == Some(100)));
    }

    #[test]
    fn random_seeds_left_to_compiler() {
        let reqs = plan(2, SeedMode::Random).expand().unwrap();
        assert!(reqs.iter().all(|r| r.params.seed.is_none()));
    }

    #[test]
    fn prompt_variations_cycle() {
        let mut p = plan(3, SeedMode::Fixed);
        p.prompt_variations = vec!["red".into(), " ".into(), "blue".into()];
        let prompts: Vec<_> = p
            .expand()
            .unwrap()
            .into_iter()
            .map(|r| r.params.prompt)
            .collect();
        assert_eq!(prompts, vec!["red", "blue", "red"]);
    }

    #[test]
    fn size_limits() {
        assert!(plan(0, SeedMode::Random).expand().is_err());
        assert!(plan(MAX_BATCH_SIZE + 1, SeedMode::Random).expand().is_err());
        assert_eq!(plan(MAX_BATCH_SIZE, SeedMode::Random).expand().unwrap().len(), MAX_BATCH_SIZE);
    }
}
