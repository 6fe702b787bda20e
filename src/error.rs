use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error("product {0} not found")]
    ProductNotFound(Uuid),

    #[error("product {0} is out of stock")]
    OutOfStock(Uuid),

    #[error("insufficient stock for product {product_id}: {available} available")]
    InsufficientStock { product_id: Uuid, available: i32 },

    #[error("product {0} is not in the cart")]
    LineNotFound(Uuid),

    #[error("coupon {0} not found")]
    CouponNotFound(String),

    #[error("coupon {0} has expired")]
    CouponExpired(String),

    #[error("coupon {0} has reached its usage limit")]
    CouponUsageExceeded(String),

    #[error("coupon {code} requires a subtotal of {minimum}; add {shortfall} more")]
    CouponMinimumNotMet {
        code: String,
        minimum: Decimal,
        shortfall: Decimal,
    },

    #[error("cart is empty")]
    EmptyCart,

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Forbidden => "forbidden",
            AppError::InvalidQuantity => "invalid_quantity",
            AppError::ProductNotFound(_) => "product_not_found",
            AppError::OutOfStock(_) => "out_of_stock",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::LineNotFound(_) => "line_not_found",
            AppError::CouponNotFound(_) => "coupon_not_found",
            AppError::CouponExpired(_) => "coupon_expired",
            AppError::CouponUsageExceeded(_) => "coupon_usage_exceeded",
            AppError::CouponMinimumNotMet { .. } => "coupon_minimum_not_met",
            AppError::EmptyCart => "empty_cart",
            AppError::ValidationFailed(_) => "validation_failed",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound | AppError::ProductNotFound(_) | AppError::LineNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::CouponNotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_)
            | AppError::InvalidQuantity
            | AppError::EmptyCart
            | AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::OutOfStock(_)
            | AppError::InsufficientStock { .. }
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::CouponExpired(_)
            | AppError::CouponUsageExceeded(_)
            | AppError::CouponMinimumNotMet { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    code: &'static str,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                code: self.code(),
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
