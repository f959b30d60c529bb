use actix_web::{HttpResponse, Responder, get, web};
use larch::geojson_export::{positions_to_feature_collection, snapshot_to_feature_collection};
use larch::snapshot::{Snapshot, SnapshotStore};
use std::sync::Arc;
use tracing::error;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(download)
        .service(download_geojson)
        .service(positions_geojson);
}

fn not_ready() -> HttpResponse {
    HttpResponse::ServiceUnavailable()
        .insert_header(("Content-Type", "text/plain"))
        .insert_header(("Retry-After", "60"))
        .body("snapshot not ready")
}

fn last_modified(snapshot: &Snapshot) -> String {
    snapshot
        .as_of
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/plain"))
        .body("Larch vehicle trail server\n\nGET /download\nGET /download.geojson\nGET /positions.geojson\n")
}

#[get("/download")]
async fn download(store: web::Data<Arc<SnapshotStore>>) -> impl Responder {
    let Some(snapshot) = store.current() else {
        return not_ready();
    };

    match snapshot.to_json() {
        Ok(body) => HttpResponse::Ok()
            .insert_header(("Content-Type", "application/json"))
            .insert_header((
                "Content-Disposition",
                "attachment; filename=\"bus_routes.json\"",
            ))
            .insert_header(("Last-Modified", last_modified(&snapshot)))
            .insert_header(("Cache-Control", "no-cache"))
            .body(body),
        Err(err) => {
            error!("could not serialise snapshot: {}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/download.geojson")]
async fn download_geojson(store: web::Data<Arc<SnapshotStore>>) -> impl Responder {
    let Some(snapshot) = store.current() else {
        return not_ready();
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "application/geo+json"))
        .insert_header(("Last-Modified", last_modified(&snapshot)))
        .insert_header(("Cache-Control", "no-cache"))
        .body(snapshot_to_feature_collection(&snapshot).to_string())
}

#[get("/positions.geojson")]
async fn positions_geojson(store: web::Data<Arc<SnapshotStore>>) -> impl Responder {
    let Some(snapshot) = store.current() else {
        return not_ready();
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "application/geo+json"))
        .insert_header(("Last-Modified", last_modified(&snapshot)))
        .insert_header(("Cache-Control", "no-cache"))
        .body(positions_to_feature_collection(&snapshot).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use chrono::{TimeZone, Utc};
    use larch::geometry::Position;

    fn store_with_snapshot() -> Arc<SnapshotStore> {
        let store = Arc::new(SnapshotStore::new());
        let mut snapshot = Snapshot::empty(Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap());
        snapshot.paths.insert(
            String::from("bus"),
            vec![Position::new(51.5, -0.1), Position::new(51.5001, -0.1005)],
        );
        snapshot
            .positions
            .insert(String::from("bus"), Position::new(51.5001, -0.1005));
        store.publish(snapshot);
        store
    }

    #[actix_web::test]
    async fn download_before_first_cycle_is_unavailable() {
        let store = Arc::new(SnapshotStore::new());
        let app =
            test::init_service(App::new().app_data(web::Data::new(store)).configure(config)).await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/download").to_request()).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn download_serves_snapshot_as_attachment() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(store_with_snapshot()))
                .configure(config),
        )
        .await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/download").to_request()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get("Last-Modified").unwrap(),
            "Tue, 05 Mar 2024 14:07:09 GMT"
        );
        assert!(
            headers
                .get("Content-Disposition")
                .unwrap()
                .to_str()
                .unwrap()
                .contains("bus_routes.json")
        );

        let body = test::read_body(response).await;
        assert_eq!(&body[..], br#"{"bus":[[51.5,-0.1],[51.5001,-0.1005]]}"#);
    }

    #[actix_web::test]
    async fn geojson_endpoints() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(store_with_snapshot()))
                .configure(config),
        )
        .await;

        let trails = test::call_and_read_body(
            &app,
            test::TestRequest::get().uri("/download.geojson").to_request(),
        )
        .await;
        let positions = test::call_and_read_body(
            &app,
            test::TestRequest::get().uri("/positions.geojson").to_request(),
        )
        .await;

        let trails = String::from_utf8(trails.to_vec()).unwrap();
        let positions = String::from_utf8(positions.to_vec()).unwrap();
        assert!(trails.contains("LineString"));
        assert!(positions.contains(r#""coordinates":[-0.1005,51.5001]"#));
    }
}
