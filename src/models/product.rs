use serde::{ Serialize, Deserialize };

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub thumbnail: Option<String>,
    pub price: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProductInput {
    pub title: Option<String>,
    pub category: Option<String>,
    pub thumbnail: Option<String>,
    pub price: Option<f64>,
}
