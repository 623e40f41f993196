use crate::web::extractors::REQUEST_ID_HEADER;
use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// 请求日志中间件
pub async fn request_logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start_time = Instant::now();

    tracing::info!(
        "Request started: {} {} - request_id={} - User-Agent: {}",
        method,
        uri,
        request_id,
        user_agent
    );

    let response = next.run(req).await;

    tracing::info!(
        "Request completed: {} {} - {} - {}ms",
        method,
        uri,
        response.status(),
        start_time.elapsed().as_millis()
    );

    response
}

/// 安全头中间件
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    // 历史记录包含个人健康数据
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}
