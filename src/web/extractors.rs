use crate::store::UserId;
use crate::utils::error::DetectError;
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

/// 调用方身份请求头
pub const USER_ID_HEADER: &str = "x-user-id";

/// 请求ID请求头
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 验证的JSON提取器
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: for<'de> Deserialize<'de> + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ValidationError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|err| ValidationError::JsonParse(err.body_text()))?;

        value
            .validate()
            .map_err(|e| ValidationError::Validation(e.to_string()))?;

        Ok(ValidatedJson(value))
    }
}

/// 验证trait
pub trait Validate {
    type Error: std::fmt::Display;

    fn validate(&self) -> Result<(), Self::Error>;
}

/// 验证错误类型
#[derive(Debug)]
pub enum ValidationError {
    JsonParse(String),
    Validation(String),
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        tracing::warn!("Rejected request body: {}", self);

        let body = crate::web::handlers::ApiResponse::<()>::error(
            "VALIDATION_ERROR".to_string(),
            self.to_string(),
        );

        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::JsonParse(msg) => write!(f, "JSON parse error: {}", msg),
            ValidationError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// 预测请求验证
impl Validate for crate::web::handlers::PredictRequest {
    type Error = String;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.image.trim().is_empty() {
            return Err("Image data cannot be empty".to_string());
        }

        Ok(())
    }
}

/// 必须提供的用户身份（缺失时拒绝请求，不做默认回退）
#[derive(Debug, Clone)]
pub struct UserIdHeader(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for UserIdHeader
where
    S: Send + Sync,
{
    type Rejection = DetectError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        read_user_id(&parts.headers)?
            .map(UserIdHeader)
            .ok_or_else(|| DetectError::InvalidInput("Missing X-User-Id header".to_string()))
    }
}

/// 可选的用户身份：缺失时不记录历史，格式错误时仍然拒绝
#[derive(Debug, Clone)]
pub struct OptionalUserId(pub Option<UserId>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUserId
where
    S: Send + Sync,
{
    type Rejection = DetectError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalUserId(read_user_id(&parts.headers)?))
    }
}

fn read_user_id(headers: &HeaderMap) -> crate::Result<Option<UserId>> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };

    let raw = value
        .to_str()
        .map_err(|_| DetectError::InvalidInput("X-User-Id header is not valid text".to_string()))?;

    UserId::parse(raw).map(Some)
}

/// 请求ID提取器
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RequestId(request_id))
    }
}
