pub mod tensor_codec;
pub mod inference;
#[cfg(feature = "ml")]
pub mod ml_model;

pub use tensor_codec::{TensorCodec, Normalization, ResizeFilter};
pub use inference::{InferenceEngine, ModelRuntime, RuntimeError};
#[cfg(feature = "ml")]
pub use inference::BurnRuntime;
#[cfg(feature = "ml")]
pub use ml_model::{PhotoClassifier, ModelConfig, NUM_CLASSES, IMAGE_SIZE};
