use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Pagination {
    /// Page number, default 1.
    pub page: Option<u64>,
    /// Items per page, default 20, at most 100.
    pub per_page: Option<u64>,
}

impl Pagination {
    /// `(page, per_page, offset)` with defaults and bounds applied.
    pub fn normalize(&self) -> (u64, u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let offset = (page - 1).saturating_mul(per_page);
        (page, per_page, offset)
    }
}
