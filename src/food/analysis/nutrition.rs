use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One dish the recognition service found in the photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub name: String,
    pub calories: f64,
    pub weight_grams: f64,
    pub protein_grams: f64,
    pub carb_grams: f64,
    pub fat_grams: f64,
}

/// Structured payload returned for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub dishes: Vec<Dish>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NutritionTotals {
    pub calories: f64,
    pub weight_grams: f64,
    pub protein_grams: f64,
    pub carb_grams: f64,
    pub fat_grams: f64,
}

impl RecognitionResult {
    pub fn totals(&self) -> NutritionTotals {
        self.dishes.iter().fold(NutritionTotals::default(), |acc, dish| NutritionTotals {
            calories: acc.calories + dish.calories,
            weight_grams: acc.weight_grams + dish.weight_grams,
            protein_grams: acc.protein_grams + dish.protein_grams,
            carb_grams: acc.carb_grams + dish.carb_grams,
            fat_grams: acc.fat_grams + dish.fat_grams,
        })
    }

    /// Whole kilocalories across all dishes, as shown on the result card.
    pub fn total_calories(&self) -> u64 {
        self.dishes
            .iter()
            .map(|dish| dish.calories.max(0.0).trunc() as u64)
            .sum()
    }
}

impl fmt::Display for Dish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.0} kcal, {:.0} g (protein {:.1} g, carbs {:.1} g, fat {:.1} g)",
            self.name, self.calories, self.weight_grams, self.protein_grams, self.carb_grams, self.fat_grams
        )
    }
}

/// Dish as the recognition service sends it. Numbers sometimes arrive as
/// strings ("250"), so each is decoded leniently.
#[derive(Debug, Deserialize)]
pub(crate) struct WireDish {
    #[serde(rename = "dishName", alias = "name")]
    name: String,
    #[serde(deserialize_with = "lenient_number")]
    calories: f64,
    #[serde(deserialize_with = "lenient_number")]
    weight: f64,
    #[serde(deserialize_with = "lenient_number")]
    protein: f64,
    #[serde(deserialize_with = "lenient_number")]
    carbohydrates: f64,
    #[serde(deserialize_with = "lenient_number")]
    fat: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResult {
    dishes: Vec<WireDish>,
    #[serde(default, alias = "comment")]
    comments: Option<String>,
}

impl From<WireResult> for RecognitionResult {
    fn from(wire: WireResult) -> Self {
        Self {
            dishes: wire
                .dishes
                .into_iter()
                .map(|d| Dish {
                    name: d.name,
                    calories: d.calories,
                    weight_grams: d.weight,
                    protein_grams: d.protein,
                    carb_grams: d.carbohydrates,
                    fat_grams: d.fat,
                })
                .collect(),
            comment: wire.comments.filter(|c| !c.trim().is_empty()),
        }
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => {
            let trimmed = s
                .trim()
                .trim_end_matches(|c: char| c.is_ascii_alphabetic())
                .trim();
            trimmed
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{}'", s)))
        }
    }
}

/// Decodes a raw recognition response body.
pub fn parse_recognition_payload(body: &str) -> Result<RecognitionResult, serde_json::Error> {
    let wire: WireResult = serde_json::from_str(body)?;
    Ok(wire.into())
}
