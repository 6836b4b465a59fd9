//! Menu snapshot types and LLM context rendering

use serde::{Deserialize, Serialize};

/// Allergen attached to a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allergen {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

/// A menu item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub allergens: Vec<Allergen>,
}

/// Menu loaded for one table at session open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuSnapshot {
    pub restaurant_name: String,
    pub table_number: String,
    pub products: Vec<Product>,
    #[serde(default)]
    pub allergens: Vec<Allergen>,
}

impl MenuSnapshot {
    /// Render the category-grouped context block fed to the LLM.
    ///
    /// Rendered once at session open and cached for the lifetime of the
    /// session; re-rendered only if the menu changes.
    pub fn context_block(&self) -> String {
        let mut categories: Vec<(&str, Vec<&Product>)> = Vec::new();

        for product in &self.products {
            let category = product.category.as_deref().unwrap_or("Diğer");
            match categories.iter_mut().find(|(name, _)| *name == category) {
                Some((_, items)) => items.push(product),
                None => categories.push((category, vec![product])),
            }
        }

        let mut lines = Vec::new();
        for (category, items) in categories {
            lines.push(format!("{category}:"));
            for product in items {
                let mut line = format!(
                    "  - ID:{} | {} | {}₺",
                    product.id, product.name, product.price
                );
                if let Some(description) = &product.description {
                    if !description.is_empty() {
                        line.push_str(" | ");
                        line.push_str(description);
                    }
                }
                if !product.allergens.is_empty() {
                    let names: Vec<&str> =
                        product.allergens.iter().map(|a| a.name.as_str()).collect();
                    line.push_str(&format!(" [Alerjen: {}]", names.join(", ")));
                }
                lines.push(line);
            }
        }

        lines.join("\n")
    }

    /// Case-insensitive product lookup by name, used to resolve the product
    /// record behind a `recommend` intent.
    pub fn find_product(&self, name: &str) -> Option<&Product> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        self.products
            .iter()
            .find(|p| p.name.to_lowercase() == needle)
            .or_else(|| {
                self.products
                    .iter()
                    .find(|p| p.name.to_lowercase().contains(&needle))
            })
    }
}
