pub mod recognition;
pub mod subscription;

// Re-export common types
pub use recognition::{
    CredentialProvider, FoodRecognizer, RecognitionClient, RecognitionCredential, RecognitionError,
    StaticCredential,
};
pub use subscription::{ClientError, SubscriptionClient};
