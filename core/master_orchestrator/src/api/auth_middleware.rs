//! Populates request extensions with `Claims` ahead of the rate limiter and
//! the audit logger, both of which key off the authenticated user id.
//! `http.rs`'s per-handler `require_auth` is still what actually rejects an
//! unauthenticated request; this middleware only makes the decoded subject
//! visible earlier in the chain. Best-effort: an invalid or missing token
//! here is not an error, it just leaves extensions unset and lets the
//! handler-level check reject the request.

use std::sync::Arc;

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};

use super::auth::JwtAuth;

#[derive(Clone)]
pub struct ClaimsExtractionMiddleware {
    jwt_auth: Option<Arc<JwtAuth>>,
}

impl ClaimsExtractionMiddleware {
    pub fn new(jwt_auth: Option<Arc<JwtAuth>>) -> Self {
        Self { jwt_auth }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ClaimsExtractionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ClaimsExtractionMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ClaimsExtractionMiddlewareService {
            service,
            jwt_auth: self.jwt_auth.clone(),
        }))
    }
}

pub struct ClaimsExtractionMiddlewareService<S> {
    service: S,
    jwt_auth: Option<Arc<JwtAuth>>,
}

impl<S, B> Service<ServiceRequest> for ClaimsExtractionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut core::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(jwt_auth) = &self.jwt_auth {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "));

            if let Some(token) = token {
                if let Ok(claims) = jwt_auth.validate_token(token) {
                    req.extensions_mut().insert(claims);
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}
