use dashmap::DashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::{errors::ServiceError, models::Product};

/// Product catalog store. Owns identity, pricing and the active flag;
/// stock lives in the inventory ledger. Orders snapshot the price at
/// checkout, so later catalog edits never affect placed orders.
#[derive(Default)]
pub struct CatalogService {
    products: DashMap<Uuid, Product>,
}

impl CatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub fn upsert(&self, product: Product) {
        self.products.insert(product.id, product);
    }

    pub fn get(&self, product_id: Uuid) -> Option<Product> {
        self.products.get(&product_id).map(|p| p.clone())
    }

    /// Returns the product only if it exists and is active; the error is
    /// the user-facing "out of catalog" signal used by cart validation.
    pub fn get_active(&self, product_id: Uuid) -> Result<Product, ServiceError> {
        match self.get(product_id) {
            Some(p) if p.is_active => Ok(p),
            _ => Err(ServiceError::ProductUnavailable(product_id)),
        }
    }

    #[instrument(skip(self))]
    pub fn deactivate(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let mut entry = self
            .products
            .get_mut(&product_id)
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))?;
        entry.is_active = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn product(active: bool) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "widget".into(),
            price: 100,
            is_active: active,
        }
    }

    #[test]
    fn inactive_products_are_unavailable() {
        let catalog = CatalogService::new();
        let p = product(false);
        let id = p.id;
        catalog.upsert(p);
        assert_matches!(
            catalog.get_active(id),
            Err(ServiceError::ProductUnavailable(got)) if got == id
        );
    }

    #[test]
    fn deactivate_hides_a_previously_active_product() {
        let catalog = CatalogService::new();
        let p = product(true);
        let id = p.id;
        catalog.upsert(p);
        assert!(catalog.get_active(id).is_ok());
        catalog.deactivate(id).unwrap();
        assert!(catalog.get_active(id).is_err());
    }

    #[test]
    fn unknown_product_is_unavailable() {
        let catalog = CatalogService::new();
        assert!(catalog.get_active(Uuid::new_v4()).is_err());
    }
}
