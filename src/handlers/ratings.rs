use actix_web::{HttpResponse, Responder, ResponseError, web};
use serde::Deserialize;

use crate::auth::authorization::verify_self;
use crate::auth::middleware::AuthenticatedUser;
use crate::models::ratings::CreateRating;
use crate::services::{RatingAggregator, SummaryUpdate};

#[derive(Debug, Deserialize)]
pub struct SubmitRatingBody {
    pub client_name: Option<String>,
    pub provider_id: String,
    #[serde(default)]
    pub provider_name: String,
    pub request_id: String,
    pub rating: f64,
    #[serde(default)]
    pub comment: String,
}

fn summary_json(summary: &SummaryUpdate) -> serde_json::Value {
    match summary {
        SummaryUpdate::Updated(summary) => serde_json::json!({
            "status": "updated",
            "summary": summary,
        }),
        SummaryUpdate::Deferred { reason } => serde_json::json!({
            "status": "deferred",
            "reason": reason,
        }),
    }
}

/// POST /api/ratings — the client of a completed request rates its provider.
pub async fn submit_rating(
    user: AuthenticatedUser,
    aggregator: web::Data<RatingAggregator>,
    body: web::Json<SubmitRatingBody>,
) -> impl Responder {
    let body = body.into_inner();

    let input = CreateRating {
        client_name: body
            .client_name
            .or(user.0.display_name)
            .unwrap_or_default(),
        client_id: user.0.user_id,
        provider_id: body.provider_id,
        provider_name: body.provider_name,
        request_id: body.request_id,
        value: body.rating,
        comment: body.comment,
    };

    match aggregator.submit_rating(input).await {
        Ok(submission) => HttpResponse::Created().json(serde_json::json!({
            "rating": submission.rating,
            "summary": summary_json(&submission.summary),
        })),
        Err(e) => e.error_response(),
    }
}

/// DELETE /api/ratings/{id} — only the client who wrote the rating.
pub async fn delete_rating(
    user: AuthenticatedUser,
    aggregator: web::Data<RatingAggregator>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    match aggregator.rating(&id).await {
        Ok(Some(rating)) => {
            if let Err(resp) = verify_self(&user, &rating.client_id, "delete ratings") {
                return resp;
            }
        }
        Ok(None) => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "error": format!("Rating {id} not found"),
            }));
        }
        Err(e) => return e.error_response(),
    }

    match aggregator.delete_rating(&id).await {
        Ok(summary) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Rating {id} deleted"),
            "summary": summary_json(&summary),
        })),
        Err(e) => e.error_response(),
    }
}

/// GET /api/providers/{id}/rating
pub async fn get_summary(
    _user: AuthenticatedUser,
    aggregator: web::Data<RatingAggregator>,
    path: web::Path<String>,
) -> impl Responder {
    match aggregator.summary(&path.into_inner()).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => e.error_response(),
    }
}

/// GET /api/providers/{id}/ratings — newest first.
pub async fn get_provider_ratings(
    _user: AuthenticatedUser,
    aggregator: web::Data<RatingAggregator>,
    path: web::Path<String>,
) -> impl Responder {
    match aggregator.ratings_for(&path.into_inner()).await {
        Ok(ratings) => HttpResponse::Ok().json(ratings),
        Err(e) => e.error_response(),
    }
}

/// POST /api/providers/{id}/rating/recompute — rebuild the summary from every rating.
pub async fn recompute_summary(
    _user: AuthenticatedUser,
    aggregator: web::Data<RatingAggregator>,
    path: web::Path<String>,
) -> impl Responder {
    match aggregator.recompute_summary(&path.into_inner()).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => e.error_response(),
    }
}

/// GET /api/requests/{id}/rated — whether the caller already rated this request.
pub async fn has_rated(
    user: AuthenticatedUser,
    aggregator: web::Data<RatingAggregator>,
    path: web::Path<String>,
) -> impl Responder {
    match aggregator.has_rated(&user.0.user_id, &path.into_inner()).await {
        Ok(rated) => HttpResponse::Ok().json(serde_json::json!({ "rated": rated })),
        Err(e) => e.error_response(),
    }
}
