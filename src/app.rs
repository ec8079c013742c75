use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, users};

pub fn build_app(state: AppState) -> Router {
    let accounts = auth::router(state.clone()).merge(users::router(state.clone()));

    Router::new()
        .nest(auth::BASE_PATH, accounts)
        .route("/api/v1/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8000".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, HeaderMap, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    use super::build_app;
    use crate::auth::claims::TokenKind;
    use crate::auth::password::verify_password;
    use crate::state::testing::{fakes, Fakes};
    use crate::state::AppState;
    use crate::users::repo_types::Role;

    const PREFIX: &str = "/api/v1/freshcart/user";

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    impl Reply {
        fn cookie(&self, name: &str) -> Option<String> {
            self.headers
                .get_all(header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(|v| {
                    v.split(';')
                        .next()
                        .and_then(|pair| pair.strip_prefix(&format!("{name}=")))
                        .map(str::to_string)
                })
        }

        fn raw_cookie(&self, name: &str) -> Option<String> {
            self.headers
                .get_all(header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find(|v| v.starts_with(&format!("{name}=")))
                .map(str::to_string)
        }

        fn access_token(&self) -> String {
            self.body["data"]["accessToken"].as_str().unwrap().to_string()
        }
    }

    async fn send(f: &Fakes, req: Request<Body>) -> Reply {
        let res = build_app(f.state.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            body,
        }
    }

    fn json_req(method: &str, path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(format!("{PREFIX}{path}"))
            .header(header::HOST, "shop.test")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authed(method: &str, path: &str, token: &str, body: Value) -> Request<Body> {
        let mut req = json_req(method, path, body);
        req.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        req
    }

    async fn signup(f: &Fakes, email: &str) -> Reply {
        send(
            f,
            json_req(
                "POST",
                "/signup",
                json!({"email": email, "password": "Secret123", "confirmPassword": "Secret123"}),
            ),
        )
        .await
    }

    fn user_id(reply: &Reply) -> uuid::Uuid {
        reply.body["data"]["user"]["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let req = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();
        let res = build_app(AppState::fake()).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn signup_returns_201_token_and_sanitized_user() {
        let f = fakes();
        let reply = signup(&f, "a@x.com").await;

        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.body["status"], "success");
        assert!(reply.body["data"]["accessToken"].is_string());
        let user = &reply.body["data"]["user"];
        assert_eq!(user["email"], "a@x.com");
        assert_eq!(user["role"], "user");
        assert!(user.get("passwordHash").is_none());
        assert!(user.get("password").is_none());
        assert!(user.get("passwordResetToken").is_none());
        assert!(reply.body.get("refreshToken").is_none());
        assert!(reply.body["data"].get("refreshToken").is_none());

        let cookie = reply.raw_cookie("refresh_token").unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Expires="));
    }

    #[tokio::test]
    async fn signup_ignores_client_supplied_role() {
        let f = fakes();
        let reply = send(
            &f,
            json_req(
                "POST",
                "/signup",
                json!({"email": "r@x.com", "password": "Secret123",
                       "confirmPassword": "Secret123", "role": "admin"}),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.body["data"]["user"]["role"], "user");
    }

    #[tokio::test]
    async fn signup_with_mismatched_passwords_is_400() {
        let f = fakes();
        let reply = send(
            &f,
            json_req(
                "POST",
                "/signup",
                json!({"email": "a@x.com", "password": "Secret123", "confirmPassword": "Other123"}),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["status"], "fail");
        assert_eq!(reply.body["message"], "Passwords are not the same!");
    }

    #[tokio::test]
    async fn login_issues_token_for_the_user_and_sets_refresh_cookie() {
        let f = fakes();
        let id = user_id(&signup(&f, "a@x.com").await);

        let reply = send(
            &f,
            json_req("POST", "/login", json!({"email": "a@x.com", "password": "Secret123"})),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);

        let verified = f
            .state
            .tokens
            .verify_kind(&reply.access_token(), TokenKind::Access)
            .unwrap();
        assert_eq!(verified.subject, id);

        let refresh = reply.cookie("refresh_token").unwrap();
        let verified = f.state.tokens.verify_kind(&refresh, TokenKind::Refresh).unwrap();
        assert_eq!(verified.subject, id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let f = fakes();
        signup(&f, "a@x.com").await;

        let wrong = send(
            &f,
            json_req("POST", "/login", json!({"email": "a@x.com", "password": "Wrong1234"})),
        )
        .await;
        let unknown = send(
            &f,
            json_req("POST", "/login", json!({"email": "b@x.com", "password": "Wrong1234"})),
        )
        .await;

        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.body["message"], "Incorrect email or password");
        assert_eq!(wrong.status, unknown.status);
        assert_eq!(wrong.body, unknown.body);
        assert!(wrong.cookie("refresh_token").is_none());
    }

    #[tokio::test]
    async fn login_without_password_is_400() {
        let f = fakes();
        let reply = send(&f, json_req("POST", "/login", json!({"email": "a@x.com"}))).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["message"], "Please provide an email and password!");
    }

    #[tokio::test]
    async fn refresh_uses_the_cookie_only() {
        let f = fakes();
        let first = signup(&f, "a@x.com").await;
        let id = user_id(&first);
        let refresh = first.cookie("refresh_token").unwrap();

        let missing = send(&f, json_req("POST", "/refresh", json!({}))).await;
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

        let mut req = json_req("POST", "/refresh", json!({}));
        req.headers_mut().insert(
            header::COOKIE,
            format!("refresh_token={refresh}").parse().unwrap(),
        );
        let reply = send(&f, req).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "success");
        let verified = f
            .state
            .tokens
            .verify_kind(&reply.access_token(), TokenKind::Access)
            .unwrap();
        assert_eq!(verified.subject, id);
        // not rotated
        assert!(reply.cookie("refresh_token").is_none());
    }

    #[tokio::test]
    async fn refresh_with_garbage_cookie_is_401() {
        let f = fakes();
        let mut req = json_req("POST", "/refresh", json!({}));
        req.headers_mut()
            .insert(header::COOKIE, "refresh_token=not.a.jwt".parse().unwrap());
        let reply = send(&f, req).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_expires_both_cookies() {
        let f = fakes();
        let reply = send(&f, json_req("POST", "/logout", json!({}))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, json!({"status": "success"}));
        assert_eq!(reply.cookie("refresh_token").as_deref(), Some("logout"));
        assert_eq!(reply.cookie("jwt").as_deref(), Some("logout"));
    }

    #[tokio::test]
    async fn me_requires_a_token() {
        let f = fakes();
        let reply = send(&f, json_req("GET", "/me", Value::Null)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["status"], "fail");
    }

    #[tokio::test]
    async fn me_returns_the_caller() {
        let f = fakes();
        let first = signup(&f, "a@x.com").await;
        let reply = send(&f, authed("GET", "/me", &first.access_token(), Value::Null)).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["data"]["user"]["email"], "a@x.com");
    }

    #[tokio::test]
    async fn token_issued_before_password_change_is_rejected() {
        let f = fakes();
        let id = user_id(&signup(&f, "a@x.com").await);
        let now = OffsetDateTime::now_utc();
        f.users.update(id, |u| u.password_changed_at = Some(now - Duration::hours(1)));
        let old = f
            .state
            .tokens
            .issue_at(id, TokenKind::Access, now - Duration::minutes(1))
            .unwrap();

        let ok = send(&f, authed("GET", "/me", &old, Value::Null)).await;
        assert_eq!(ok.status, StatusCode::OK);

        f.users.update(id, |u| u.password_changed_at = Some(now));
        assert!(f.state.tokens.verify(&old).is_ok());
        let stale = send(&f, authed("GET", "/me", &old, Value::Null)).await;
        assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_route_requires_admin_role() {
        let f = fakes();
        let caller = signup(&f, "a@x.com").await;
        let target = user_id(&signup(&f, "b@x.com").await);
        let path = format!("/admin/users/{target}");

        let denied = send(&f, authed("GET", &path, &caller.access_token(), Value::Null)).await;
        assert_eq!(denied.status, StatusCode::FORBIDDEN);
        assert_eq!(
            denied.body["message"],
            "You do not have permission to perform this action"
        );

        f.users.update(user_id(&caller), |u| u.role = Role::Admin);
        let allowed = send(&f, authed("GET", &path, &caller.access_token(), Value::Null)).await;
        assert_eq!(allowed.status, StatusCode::OK);
        assert_eq!(allowed.body["data"]["user"]["email"], "b@x.com");

        let missing = format!("/admin/users/{}", uuid::Uuid::new_v4());
        let nf = send(&f, authed("GET", &missing, &caller.access_token(), Value::Null)).await;
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
    }

    fn reset_token_from_mail(f: &Fakes) -> String {
        let sent = f.mailer.sent();
        let text = &sent.last().unwrap().text;
        text.split("/resetPassword/")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn forgot_password_mails_a_link_with_the_request_host() {
        let f = fakes();
        signup(&f, "a@x.com").await;
        let reply = send(&f, json_req("POST", "/forgotPassword", json!({"email": "a@x.com"}))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(
            reply.body,
            json!({"status": "success", "message": "Token sent to email!"})
        );
        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .text
            .contains("http://shop.test/api/v1/freshcart/user/resetPassword/"));
        assert_eq!(sent[0].from.name, "FreshCart");
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email_stores_and_sends_nothing() {
        let f = fakes();
        let id = user_id(&signup(&f, "a@x.com").await);
        let reply = send(&f, json_req("POST", "/forgotPassword", json!({"email": "b@x.com"}))).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert!(f.mailer.sent().is_empty());
        assert!(f.users.get(id).unwrap().password_reset_token.is_none());
    }

    #[tokio::test]
    async fn mail_failure_is_a_retryable_error() {
        let f = fakes();
        let id = user_id(&signup(&f, "a@x.com").await);
        f.mailer.fail_next_sends(true);
        let reply = send(&f, json_req("POST", "/forgotPassword", json!({"email": "a@x.com"}))).await;
        assert!(reply.status.is_server_error());
        assert_eq!(reply.body["status"], "error");
        let stored = f.users.get(id).unwrap();
        assert!(stored.password_reset_token.is_none());
        assert!(stored.password_reset_expires.is_none());
    }

    #[tokio::test]
    async fn reset_password_logs_in_and_burns_the_token() {
        let f = fakes();
        let id = user_id(&signup(&f, "a@x.com").await);
        send(&f, json_req("POST", "/forgotPassword", json!({"email": "a@x.com"}))).await;
        let token = reset_token_from_mail(&f);
        let body = json!({"password": "NewSecret1", "confirmPassword": "NewSecret1"});

        let reply = send(&f, json_req("PATCH", &format!("/resetPassword/{token}"), body.clone())).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.cookie("refresh_token").is_some());
        let stored = f.users.get(id).unwrap();
        assert!(stored.password_reset_token.is_none());
        assert!(stored.password_reset_expires.is_none());
        assert!(verify_password("NewSecret1", &stored.password_hash).unwrap());

        let again = send(&f, json_req("PATCH", &format!("/resetPassword/{token}"), body)).await;
        assert_eq!(again.status, StatusCode::BAD_REQUEST);
        assert_eq!(again.body["message"], "Token is invalid or has expired.");
    }

    #[tokio::test]
    async fn expired_reset_token_leaves_password_unchanged() {
        let f = fakes();
        let id = user_id(&signup(&f, "a@x.com").await);
        send(&f, json_req("POST", "/forgotPassword", json!({"email": "a@x.com"}))).await;
        let token = reset_token_from_mail(&f);
        f.users.update(id, |u| {
            u.password_reset_expires = Some(OffsetDateTime::now_utc() - Duration::minutes(1))
        });
        let before = f.users.get(id).unwrap().password_hash;

        let reply = send(
            &f,
            json_req(
                "PATCH",
                &format!("/resetPassword/{token}"),
                json!({"password": "NewSecret1", "confirmPassword": "NewSecret1"}),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(f.users.get(id).unwrap().password_hash, before);
    }

    #[tokio::test]
    async fn update_password_requires_the_current_one() {
        let f = fakes();
        let first = signup(&f, "a@x.com").await;
        let token = first.access_token();

        let wrong = send(
            &f,
            authed(
                "PATCH",
                "/updatePassword",
                &token,
                json!({"currentPassword": "Nope12345", "password": "NewSecret1",
                       "confirmPassword": "NewSecret1"}),
            ),
        )
        .await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

        let ok = send(
            &f,
            authed(
                "PATCH",
                "/updatePassword",
                &token,
                json!({"currentPassword": "Secret123", "password": "NewSecret1",
                       "confirmPassword": "NewSecret1"}),
            ),
        )
        .await;
        assert_eq!(ok.status, StatusCode::OK);
        assert!(ok.cookie("refresh_token").is_some());

        let login = send(
            &f,
            json_req("POST", "/login", json!({"email": "a@x.com", "password": "NewSecret1"})),
        )
        .await;
        assert_eq!(login.status, StatusCode::OK);
    }

    fn multipart(token: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
        let boundary = "freshcartboundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; \
                 filename=\"avatar\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("PATCH")
            .uri(format!("{PREFIX}/updateImage"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn update_image_stores_avatar_and_returns_link() {
        let f = fakes();
        let first = signup(&f, "a@x.com").await;
        let id = user_id(&first);

        let reply = send(&f, multipart(&first.access_token(), "image/png", b"\x89PNG")).await;
        assert_eq!(reply.status, StatusCode::OK);
        let key = f.users.get(id).unwrap().image.unwrap();
        assert!(key.starts_with(&format!("users/{id}/avatar-")));
        assert_eq!(reply.body["data"]["user"]["image"], key.as_str());
        assert!(reply.body["data"]["imageUrl"]
            .as_str()
            .unwrap()
            .contains(&key));
        assert_eq!(f.storage.objects.lock().unwrap()[0].1, "image/png");
    }

    #[tokio::test]
    async fn update_image_rejects_non_images() {
        let f = fakes();
        let first = signup(&f, "a@x.com").await;
        let reply = send(&f, multipart(&first.access_token(), "text/plain", b"hello")).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(f.storage.objects.lock().unwrap().is_empty());
    }
}
