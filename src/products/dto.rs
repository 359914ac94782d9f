use serde::Deserialize;
use uuid::Uuid;

use crate::{
    brands::dto::check_len,
    error::{AppError, AppResult},
};

fn check_price(original_price: f64, discount_percent: Option<f64>) -> AppResult<()> {
    if !original_price.is_finite() || original_price <= 0.0 {
        return Err(AppError::bad_request("original_price must be a positive number"));
    }
    if let Some(discount) = discount_percent {
        check_discount(discount)?;
    }
    Ok(())
}

fn check_discount(discount: f64) -> AppResult<()> {
    if !(0.0..=100.0).contains(&discount) {
        return Err(AppError::bad_request("discount_percent must be between 0 and 100"));
    }
    Ok(())
}

pub(crate) fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> AppResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("{field} must be a number")))
}

pub(crate) fn parse_uuid(field: &str, raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::bad_request(format!("{field} must be an id")))
}

/// Comma separated or JSON-array list of storage keys.
pub fn parse_keys(raw: &str) -> AppResult<Vec<String>> {
    let raw = raw.trim();
    let keys: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|_| AppError::bad_request("invalid attachment list"))?
    } else {
        raw.split(',').map(|s| s.trim().to_string()).collect()
    };
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys.into_iter().filter(|k| !k.is_empty()) {
        if !out.contains(&key) {
            out.push(key);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub name: String,
    pub description: String,
    pub original_price: f64,
    pub discount_percent: Option<f64>,
    pub stock: u64,
    pub category: Uuid,
    pub brand: Uuid,
}

impl CreateProduct {
    pub fn validate(&self) -> AppResult<()> {
        check_len("name", &self.name, 2, 2000)?;
        check_len("description", &self.description, 2, 50000)?;
        check_price(self.original_price, self.discount_percent)?;
        if self.stock == 0 {
            return Err(AppError::bad_request("stock must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub original_price: Option<f64>,
    pub discount_percent: Option<f64>,
    pub stock: Option<u64>,
    pub category: Option<Uuid>,
    pub brand: Option<Uuid>,
}

impl UpdateProduct {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.is_none()
            && self.description.is_none()
            && self.original_price.is_none()
            && self.discount_percent.is_none()
            && self.stock.is_none()
            && self.category.is_none()
            && self.brand.is_none()
        {
            return Err(AppError::bad_request("all update fields are empty"));
        }
        if let Some(name) = &self.name {
            check_len("name", name, 2, 2000)?;
        }
        if let Some(description) = &self.description {
            check_len("description", description, 2, 50000)?;
        }
        if let Some(price) = self.original_price {
            check_price(price, None)?;
        }
        if let Some(discount) = self.discount_percent {
            check_discount(discount)?;
        }
        Ok(())
    }

    pub fn touches_price(&self) -> bool {
        self.original_price.is_some() || self.discount_percent.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create() -> CreateProduct {
        CreateProduct {
            name: "Air Max".into(),
            description: "Running shoe".into(),
            original_price: 120.0,
            discount_percent: Some(10.0),
            stock: 3,
            category: Uuid::new_v4(),
            brand: Uuid::new_v4(),
        }
    }

    #[test]
    fn create_checks_prices_and_stock() {
        assert!(create().validate().is_ok());
        assert!(CreateProduct { original_price: 0.0, ..create() }.validate().is_err());
        assert!(CreateProduct { original_price: f64::NAN, ..create() }.validate().is_err());
        assert!(CreateProduct { discount_percent: Some(101.0), ..create() }.validate().is_err());
        assert!(CreateProduct { stock: 0, ..create() }.validate().is_err());
    }

    #[test]
    fn update_needs_a_field() {
        assert!(UpdateProduct::default().validate().is_err());
        let update = UpdateProduct {
            discount_percent: Some(20.0),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
        assert!(update.touches_price());
    }

    #[test]
    fn keys_parse_and_dedup() {
        assert_eq!(parse_keys("a, b,a").unwrap(), vec!["a", "b"]);
        assert_eq!(parse_keys("[\"x\",\"x\"]").unwrap(), vec!["x"]);
        assert!(parse_keys("").unwrap().is_empty());
        assert!(parse_keys("[1").is_err());
    }

    #[test]
    fn form_numbers_are_parsed() {
        assert_eq!(parse_number::<f64>("price", " 9.5 ").unwrap(), 9.5);
        assert!(parse_number::<u64>("stock", "-1").is_err());
        assert!(parse_uuid("brand", "nope").is_err());
    }
}
