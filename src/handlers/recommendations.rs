use crate::{
    error::ApiError,
    models::{RecommendationRequest, RecommendationResponse},
    services::RecommendationResolver,
};
use actix_web::{
    web::{self, Json},
    HttpResponse,
};

pub fn recommendations_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/recommendations").route(web::post().to(get_recommendations)));
}

/// Resolve a free-text book request into ranked catalog records. Odd input
/// (empty query and so on) degrades inside the resolver; only an invalid
/// limit or a total catalog outage surfaces as an error.
pub async fn get_recommendations(
    request: Json<RecommendationRequest>,
    resolver: web::Data<RecommendationResolver>,
) -> Result<HttpResponse, ApiError> {
    let results = resolver
        .resolve(&request.query, request.limit, &request.options)
        .await?;

    Ok(HttpResponse::Ok().json(RecommendationResponse { results }))
}
