use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::select;
use uuid::Uuid;

use crate::global::GlobalState;
use crate::repository::RepositoryError;

mod channels;

pub async fn run(global: Arc<GlobalState>) -> Result<()> {
    let addr: SocketAddr = global.config.bind_address.parse()?;

    tracing::info!("listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;

    let ctx = global.ctx.clone();

    loop {
        let (socket, _) = select! {
            accepted = listener.accept() => accepted?,
            _ = ctx.done() => {
                tracing::info!("api shutting down");
                return Ok(());
            }
        };

        let global = global.clone();
        let conn = hyper::server::conn::Http::new()
            .serve_connection(socket, service_fn(move |req| handle(global.clone(), req)));

        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!("connection error: {}", err);
            }
        });
    }
}

async fn handle(global: Arc<GlobalState>, req: Request<Body>) -> Result<Response<Body>> {
    let method = req.method().clone();
    let path = req.uri().path().trim_matches('/').to_string();
    let segments: Vec<&str> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('/').collect()
    };

    match (&method, segments.as_slice()) {
        (&Method::GET, []) => Ok(Response::new(Body::empty())),
        (&Method::POST, ["channels"]) => channels::create(global, req).await,
        (&Method::GET, ["channels"]) => channels::list(global, req).await,
        (&Method::GET, ["channels", "search", name]) => {
            let name = name.to_string();
            channels::search(global, &name).await
        }
        (&Method::GET, ["channels", id]) => match parse_id(id) {
            Some(id) => channels::get_by_id(global, id).await,
            None => Ok(message_response(StatusCode::BAD_REQUEST, "invalid channel id")),
        },
        (&Method::PUT, ["channels", id]) => match parse_id(id) {
            Some(id) => channels::update_by_id(global, id, req).await,
            None => Ok(message_response(StatusCode::BAD_REQUEST, "invalid channel id")),
        },
        (&Method::DELETE, ["channels", id]) => match parse_id(id) {
            Some(id) => channels::delete_by_id(global, id).await,
            None => Ok(message_response(StatusCode::BAD_REQUEST, "invalid channel id")),
        },
        _ => Ok(message_response(StatusCode::NOT_FOUND, "not found")),
    }
}

fn parse_id(id: &str) -> Option<Uuid> {
    id.parse().ok()
}

pub(super) fn json_response<T: serde::Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(value)?))?)
}

pub(super) fn message_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = json!({ "message": message, "success": false });

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to build response")
}

/// Maps store errors onto the API boundary: a missing resource stays
/// distinct from the store being unreachable.
pub(super) fn repository_error_response(err: RepositoryError) -> Response<Body> {
    match err {
        RepositoryError::NotFound => {
            message_response(StatusCode::NOT_FOUND, "channel does not exist")
        }
        RepositoryError::AlreadyExists => {
            message_response(StatusCode::CONFLICT, "channel already exists")
        }
        RepositoryError::CorruptRecord(err) => {
            tracing::error!("corrupt channel record: {}", err);
            message_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
        RepositoryError::Canceled(reason) => {
            tracing::warn!("request canceled: {}", reason);
            message_response(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
        }
        RepositoryError::Store(err) => {
            tracing::error!("store error: {}", err);
            message_response(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
        }
    }
}
