use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpResponse, HttpMessage,
    body::{MessageBody, EitherBody},
};
use actix_web::http::Method;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use std::sync::Arc;

/// Validation schemas for the externally-facing endpoints.
pub struct ValidationSchemas {
    request_schema: Arc<JSONSchema>,
}

impl ValidationSchemas {
    pub fn new() -> Self {
        let schema_value = serde_json::json!({
            "type": "object",
            "required": ["request"],
            "properties": {
                "request": {
                    "type": "string",
                    "minLength": 1
                },
                "agentId": {
                    "type": ["string", "null"]
                },
                "autoRoute": {
                    "type": ["boolean", "null"]
                },
                "includeHistory": {
                    "type": ["boolean", "null"]
                },
                "conversationId": {
                    "type": ["string", "null"]
                }
            },
            "additionalProperties": false
        });
        let request_schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .expect("invalid /request schema");

        Self {
            request_schema: Arc::new(request_schema),
        }
    }

    pub fn validate_request(&self, value: &Value) -> Result<(), String> {
        self.request_schema
            .validate(value)
            .map_err(|errors| {
                errors
                    .map(|e| format!("{} at {}", e, e.instance_path))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
    }
}

#[derive(Clone)]
pub struct RequestValidationMiddleware {
    schemas: Arc<ValidationSchemas>,
}

impl RequestValidationMiddleware {
    pub fn new() -> Self {
        Self {
            schemas: Arc::new(ValidationSchemas::new()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestValidationMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + Clone + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequestValidationMiddlewareService<S, B>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestValidationMiddlewareService::new(
            service,
            self.schemas.clone(),
        )))
    }
}

#[derive(Clone)]
pub struct RequestValidationMiddlewareService<S, B> {
    service: S,
    schemas: Arc<ValidationSchemas>,
    _phantom: std::marker::PhantomData<B>,
}

impl<S, B> RequestValidationMiddlewareService<S, B> {
    fn new(service: S, schemas: Arc<ValidationSchemas>) -> Self {
        Self {
            service,
            schemas,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<S, B> Service<ServiceRequest> for RequestValidationMiddlewareService<S, B>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + Clone + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut core::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let schemas = self.schemas.clone();
        let method = req.method().clone();
        let path = req.path().to_owned();

        if method == Method::POST && path.ends_with("/request") {
            let service = self.service.clone();
            Box::pin(async move {
                if let Ok(body) = req.extract::<web::Json<Value>>().await {
                    if let Err(err) = schemas.validate_request(&body.into_inner()) {
                        let res = HttpResponse::BadRequest()
                            .body(err)
                            .map_into_right_body();
                        return Ok(ServiceResponse::new(req.into_parts().0, res));
                    }
                } else {
                    let res = HttpResponse::BadRequest()
                        .finish()
                        .map_into_right_body();
                    return Ok(ServiceResponse::new(req.into_parts().0, res));
                }
                Ok(service.call(req).await?.map_into_left_body())
            })
        } else {
            let fut = self.service.call(req);
            Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
        }
    }
}
