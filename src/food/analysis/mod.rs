pub mod nutrition;

pub use nutrition::{Dish, NutritionTotals, RecognitionResult};
