pub mod ratings;
pub mod requests;
pub mod watch;

use actix_web::web;

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    // ── Request lifecycle routes (all protected — require valid JWT) ──
    cfg.service(
        web::scope("/requests")
            .route("", web::post().to(requests::submit_request))
            .route("/{id}", web::get().to(requests::get_request))
            .route("/{id}", web::delete().to(requests::delete_request))
            .route("/{id}/responses", web::post().to(requests::respond))
            .route("/{id}/accept", web::post().to(requests::accept))
            .route("/{id}/reject", web::post().to(requests::reject))
            .route("/{id}/complete", web::post().to(requests::complete))
            .route("/{id}/cancel", web::post().to(requests::cancel))
            .route("/{id}/rated", web::get().to(ratings::has_rated)),
    );

    // ── Rating routes ──
    cfg.service(web::resource("/ratings").route(web::post().to(ratings::submit_rating)));
    cfg.service(web::resource("/ratings/{id}").route(web::delete().to(ratings::delete_rating)));
    cfg.service(
        web::scope("/providers/{id}")
            .route("/rating", web::get().to(ratings::get_summary))
            .route("/rating/recompute", web::post().to(ratings::recompute_summary))
            .route("/ratings", web::get().to(ratings::get_provider_ratings)),
    );

    // ── Live snapshot streams (WebSocket; token via header or ?token=) ──
    cfg.service(
        web::scope("/watch/requests")
            .route("/pending", web::get().to(watch::watch_pending))
            .route("/client/{id}", web::get().to(watch::watch_by_client))
            .route("/service-type/{service_type}", web::get().to(watch::watch_by_service_type))
            .route("/provider/{id}", web::get().to(watch::watch_by_provider)),
    );
}
