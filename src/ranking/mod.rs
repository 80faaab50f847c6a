pub mod result_ranker;

pub use result_ranker::{RankerConfig, ResultRanker, UncertainPolicy, UNCERTAIN_LABEL};
