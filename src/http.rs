use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::error::Error;
use crate::ingest::{FormFile, Ingestor, MultipartForm};
use crate::media;
use crate::preview::PreviewCache;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct Base64Upload {
    name: String,
    data: String,
}

#[derive(Serialize)]
struct UploadResponse {
    file: String,
    preview: String,
}

#[derive(Deserialize)]
struct UrlQuery {
    url: String,
}

struct AppState {
    ingestor: Ingestor,
    previews: PreviewCache,
    img_path: String,
    preview_path: String,
}

type SharedState = Arc<AppState>;

fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.status() {
            Some(status) => json_error(status, &self.to_string()),
            None => {
                tracing::error!(error = %self, "request failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

/// Routes for uploading images, fetching previews and serving originals.
pub fn router(config: &ServerConfig) -> Result<Router, Error> {
    let storage = config.storage.clone();
    let state = Arc::new(AppState {
        previews: PreviewCache::new(&storage),
        ingestor: Ingestor::new(storage.clone())?,
        img_path: config.img_path.clone(),
        preview_path: config.preview_path.clone(),
    });

    Ok(Router::new()
        .route(
            &config.upload_path,
            get(upload_url)
                .post(upload)
                .layer(DefaultBodyLimit::max(config.upload_limit)),
        )
        .route(&format!("{}/{{*name}}", config.preview_path), get(preview))
        .nest_service(&config.img_path, ServeDir::new(storage.original_root))
        .with_state(state))
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Multipart bodies redirect to the preview, JSON base64 bodies answer with
/// both links.
async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "multipart/form-data" => {
            let multipart = match Multipart::from_request(request, &state).await {
                Ok(multipart) => multipart,
                Err(rejection) => {
                    return json_error(StatusCode::BAD_REQUEST, &rejection.body_text());
                }
            };
            let form = match read_form(multipart).await {
                Ok(form) => form,
                Err(err) => return err.into_response(),
            };
            match state.ingestor.multipart(&form).await {
                Ok(stored) => found(format!("{}/{}", state.preview_path, stored.name)),
                Err(err) => err.into_response(),
            }
        }
        "application/json" => {
            let Json(body) = match Json::<Base64Upload>::from_request(request, &state).await {
                Ok(body) => body,
                Err(rejection) => {
                    return json_error(StatusCode::BAD_REQUEST, &rejection.body_text());
                }
            };
            match state.ingestor.base64(&body.data, &body.name).await {
                Ok(stored) => (
                    StatusCode::OK,
                    Json(UploadResponse {
                        file: format!("{}/{}", state.img_path, stored.name),
                        preview: format!("{}/{}", state.preview_path, stored.name),
                    }),
                )
                    .into_response(),
                Err(err) => err.into_response(),
            }
        }
        _ => json_error(
            StatusCode::NOT_IMPLEMENTED,
            &format!("content type ({content_type}) not supported"),
        ),
    }
}

async fn upload_url(State(state): State<SharedState>, Query(query): Query<UrlQuery>) -> Response {
    match state.ingestor.url(&query.url).await {
        Ok(stored) => found(format!("{}/{}", state.preview_path, stored.name)),
        Err(err) => err.into_response(),
    }
}

/// Serves the preview with the content type of the bytes actually stored,
/// which differs from the name's extension when that format has no encoder.
async fn preview(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Response, Error> {
    let path = state.previews.lookup(&name).await?;
    let bytes = fs::read(&path).await?;
    let content_type = match image::guess_format(&bytes) {
        Ok(format) => format.to_mime_type(),
        Err(_) => {
            let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
            media::content_type_for(extension)
        }
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// Collects the file parts of a multipart body. Plain form values are
/// skipped.
async fn read_form(mut multipart: Multipart) -> Result<MultipartForm, Error> {
    let mut form = MultipartForm::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(Error::bad_request(format!("read form failed: {err}"))),
        };
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let name = field.name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| Error::bad_request(format!("read file failed: {err}")))?;
        form.push(FormFile {
            field: name,
            file_name: Some(file_name),
            content_type,
            data,
        });
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use axum_test::multipart::{MultipartForm as TestForm, Part};
    use image::GenericImageView;
    use serde_json::{Value, json};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::Config;
    use crate::imaging::{self, tests::sample_png};

    fn server() -> (tempfile::TempDir, TestServer) {
        let tmp = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage: Config {
                original_root: tmp.path().join("img"),
                preview_root: tmp.path().join("preview"),
                ..Config::default()
            },
            ..ServerConfig::default()
        };
        let server = TestServer::new(router(&config).unwrap()).unwrap();
        (tmp, server)
    }

    fn png_form(field: &str) -> TestForm {
        TestForm::new().add_part(
            field,
            Part::bytes(sample_png(10, 10))
                .file_name("pic.png")
                .mime_type("image/png"),
        )
    }

    #[tokio::test]
    async fn multipart_upload_redirects_to_preview() {
        let (tmp, server) = server();

        let response = server.post("/upload").multipart(png_form("file")).await;

        response.assert_status(StatusCode::FOUND);
        assert_eq!(response.header(header::LOCATION), "/preview/pic.png");
        assert!(tmp.path().join("img/pic.png").exists());

        let response = server.get("/preview/pic.png").await;
        response.assert_status_ok();
        assert_eq!(response.header(header::CONTENT_TYPE), "image/png");
        let preview = imaging::decode(response.as_bytes()).unwrap();
        assert_eq!(preview.image.dimensions(), (100, 100));
    }

    #[tokio::test]
    async fn multipart_without_file_field_is_bad_request() {
        let (_tmp, server) = server();

        let response = server.post("/upload").multipart(png_form("file1")).await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn base64_upload_returns_links() {
        let (_tmp, server) = server();
        let data = format!(
            "data:image/png;base64,{}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sample_png(10, 10))
        );

        let response = server
            .post("/upload")
            .json(&json!({ "name": "file.png", "data": data }))
            .await;

        response.assert_status_ok();
        response.assert_json(&json!({
            "file": "/img/file.png",
            "preview": "/preview/file.png",
        }));

        let original = server.get("/img/file.png").await;
        original.assert_status_ok();
    }

    #[tokio::test]
    async fn base64_non_image_is_unsupported() {
        let (_tmp, server) = server();

        let response = server
            .post("/upload")
            .json(&json!({ "name": "file.ext", "data": "data:image/png;base64,iVBORw0K" }))
            .await;

        response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn preview_content_type_follows_encoded_format() {
        let (_tmp, server) = server();
        let data = format!(
            "data:image/png;base64,{}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sample_png(10, 10))
        );

        for (name, expected) in [
            ("pic.tiff", "image/png"),
            ("pic.dat", "image/png"),
            ("pic.jpg", "image/jpeg"),
        ] {
            server
                .post("/upload")
                .json(&json!({ "name": name, "data": data }))
                .await
                .assert_status_ok();

            let response = server.get(&format!("/preview/{name}")).await;
            response.assert_status_ok();
            assert_eq!(response.header(header::CONTENT_TYPE), expected, "{name}");
            let format = image::guess_format(response.as_bytes()).unwrap();
            assert_eq!(format.to_mime_type(), expected, "{name}");
        }
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (_tmp, server) = server();

        let response = server
            .post("/upload")
            .text("")
            .content_type("application/json")
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_content_types_are_not_implemented() {
        let (_tmp, server) = server();

        let response = server
            .post("/upload")
            .text("whatever")
            .content_type("application")
            .await;

        response.assert_status(StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn url_upload_redirects_and_reports_failures() {
        let (_tmp, server) = server();
        let remote = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(sample_png(10, 10)),
            )
            .mount(&remote)
            .await;

        let response = server
            .get("/upload")
            .add_query_param("url", format!("{}/remote.png", remote.uri()))
            .await;
        response.assert_status(StatusCode::FOUND);
        assert_eq!(response.header(header::LOCATION), "/preview/remote.png");

        let response = server
            .get("/upload")
            .add_query_param("url", "http://127.0.0.1:1/x.png")
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = response.json();
        assert!(body["error"].as_str().unwrap().starts_with("image download failed"));
    }

    #[tokio::test]
    async fn unknown_preview_is_not_found() {
        let (_tmp, server) = server();

        server
            .get("/preview/missing.png")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get("/preview/bad-name.png")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
