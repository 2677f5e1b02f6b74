#[macro_use]
mod common;

#[cfg(test)]
mod tests {
    use super::common::{self, GOOGLE_TOKEN};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use chrono::{Duration, Utc};
    use eventapp_server::database::{format_time, Filter};
    use serde_json::json;

    #[actix_rt::test]
    async fn register_login_logout_round() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;

        let (status, body) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/register").set_json(json!({
                "email": "Alice@Example.com",
                "password": "secret123",
                "full_name": "Alice"
            }))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "SUCCESS");
        assert_eq!(body["data"]["email"], "alice@example.com");
        assert_eq!(body["data"]["userType"], 1);
        assert!(body["data"].get("password").is_none());
        assert_eq!(ctx.outbox.email_count(), 1, "welcome email");

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login")
                .set_json(json!({"username": "alice@example.com", "password": "secret123"}))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Login Successful");
        assert!(body["data"].get("resetPasswordLink").is_none());
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/logout")
                .insert_header(("Authorization", format!("Bearer {}", token)))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logged Out Successfully");

        // the revoked token no longer authenticates
        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/logout")
                .insert_header(("Authorization", format!("Bearer {}", token)))
        );
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "UNAUTHORIZED");
    }

    #[actix_rt::test]
    async fn register_rejects_missing_contact_and_duplicates() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/register")
                .set_json(json!({"password": "secret123"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "BAD_REQUEST");

        let register = json!({"email": "bob@example.com", "password": "secret123"});
        let (status, _) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/register").set_json(register.clone())
        );
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/register").set_json(register)
        );
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "bob@example.com already exists.Unique email are allowed.");

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/register")
                .set_json(json!({"email": "not-an-email", "password": "secret123"}))
        );
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "VALIDATION_ERROR");
    }

    #[actix_rt::test]
    async fn lockout_after_retry_limit() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;
        ctx.signed_in("carol@example.com", "secret123").await;

        for _ in 0..3 {
            let (status, body) = send!(
                app,
                test::TestRequest::post()
                    .uri("/userapp/auth/login")
                    .set_json(json!({"username": "carol@example.com", "password": "wrong-pass"}))
            );
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], "Incorrect Password");
        }

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login")
                .set_json(json!({"username": "carol@example.com", "password": "secret123"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("you can login after"));

        // once the lock has passed the correct password works again
        let past = format_time(&(Utc::now() - Duration::minutes(1)));
        let patch = common::object(json!({ "loginReactiveTime": past }));
        ctx.store
            .update_one("user", &Filter::new().eq("email", "carol@example.com"), &patch)
            .await
            .unwrap();
        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login")
                .set_json(json!({"username": "carol@example.com", "password": "secret123"}))
        );
        assert_eq!(status, StatusCode::OK);
        let user = ctx
            .store
            .find_one("user", &Filter::new().eq("email", "carol@example.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.get_i64("loginRetryLimit"), Some(0));
    }

    #[actix_rt::test]
    async fn inactive_users_cannot_log_in() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;
        let (_, token) = ctx.signed_in("dan@example.com", "secret123").await;

        let patch = common::object(json!({ "isActive": false }));
        ctx.store
            .update_one("user", &Filter::new().eq("email", "dan@example.com"), &patch)
            .await
            .unwrap();

        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login")
                .set_json(json!({"username": "dan@example.com", "password": "secret123"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // existing tokens stop working too
        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/logout")
                .insert_header(("Authorization", format!("Bearer {}", token)))
        );
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn otp_login_is_single_use() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;
        ctx.signed_in("erin@example.com", "secret123").await;

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login-otp")
                .set_json(json!({"email": "erin@example.com"}))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "otp successfully send to your email.");
        let otp = ctx.outbox.last_otp().unwrap();

        let login = json!({"username": "erin@example.com", "otp": otp});
        let (status, body) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/login").set_json(login.clone())
        );
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["token"].is_string());

        let (status, body) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/login").set_json(login)
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "FAILURE");
        assert_eq!(body["message"], "Invalid Otp");
    }

    #[actix_rt::test]
    async fn otp_for_unknown_user_is_not_found() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/reset-password-otp")
                .set_json(json!({"phone": "9999999999"}))
        );
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "RECORD_NOT_FOUND");

        let (status, _) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/login-otp").set_json(json!({}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn reset_password_with_code() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;
        ctx.signed_in("fay@example.com", "secret123").await;

        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/reset-password-otp")
                .set_json(json!({"email": "fay@example.com"}))
        );
        assert_eq!(status, StatusCode::OK);
        let code = ctx.outbox.last_otp().unwrap();

        let (status, body) = send!(
            app,
            test::TestRequest::put()
                .uri("/userapp/auth/reset-password")
                .set_json(json!({"code": "000000x", "newPassword": "newsecret1"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid Code");

        let (status, body) = send!(
            app,
            test::TestRequest::put()
                .uri("/userapp/auth/reset-password")
                .set_json(json!({"code": code, "newPassword": "newsecret1"}))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Password reset successfully");

        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login")
                .set_json(json!({"username": "fay@example.com", "password": "secret123"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login")
                .set_json(json!({"username": "fay@example.com", "password": "newsecret1"}))
        );
        assert_eq!(status, StatusCode::OK);
    }

    #[actix_rt::test]
    async fn expired_codes_are_refused() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;
        ctx.signed_in("gus@example.com", "secret123").await;

        let expired = format_time(&(Utc::now() - Duration::minutes(1)));
        let patch = common::object(json!({
            "resetPasswordLink": { "code": "123456", "expireTime": expired }
        }));
        ctx.store
            .update_one("user", &Filter::new().eq("email", "gus@example.com"), &patch)
            .await
            .unwrap();

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/validate-otp")
                .set_json(json!({"otp": "123456"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Your reset password link is expired or invalid");

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/validate-otp")
                .set_json(json!({}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "BAD_REQUEST");
    }

    #[actix_rt::test]
    async fn register_with_otp_consumes_code() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/register-otp")
                .set_json(json!({"email": "hal@example.com", "phone": "9876543210"}))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "otp successfully send.");
        let otp = ctx.outbox.last_otp().unwrap();

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/register")
                .set_json(json!({"email": "hal@example.com", "password": "secret123", "otp": "111111x"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid OTP");

        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/register")
                .set_json(json!({"email": "hal@example.com", "password": "secret123", "otp": otp}))
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ctx.store.count("otp", &Filter::new()).await.unwrap(), 0);

        let (status, body) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/register-otp")
                .set_json(json!({"email": "hal@example.com"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "User is Already Exist");
    }

    #[actix_rt::test]
    async fn store_multiple_users() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;

        let (status, body) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/store-multiple").set_json(json!({}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid input. Expected an array of user objects.");

        let (status, body) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/store-multiple").set_json(json!([
                {"full_name": "Ivy", "email": "ivy@example.com", "password": 123456},
                {"full_name": "Jon", "email": "jon@example.com", "password": "jonpass1"}
            ]))
        );
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Users stored successfully");
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        // numeric passwords are stored as their text form
        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/login")
                .set_json(json!({"username": "ivy@example.com", "password": "123456"}))
        );
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/store-multiple").set_json(json!([
                {"full_name": "Kim", "email": "kim@example.com"}
            ]))
        );
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/store-multiple").set_json(json!([
                {"full_name": "Jon", "email": "jon@example.com", "password": "again123"}
            ]))
        );
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn google_login_finds_or_creates_user() {
        let ctx = common::context();
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;

        let (status, body) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/google").set_json(json!({}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Insufficient credentials");

        let (status, _) = send!(
            app,
            test::TestRequest::post()
                .uri("/userapp/auth/google")
                .set_json(json!({"credentials": "forged"}))
        );
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        for path in ["/userapp/auth/firebase/google", "/userapp/auth/google"] {
            let (status, body) = send!(
                app,
                test::TestRequest::post()
                    .uri(path)
                    .set_json(json!({"credentials": GOOGLE_TOKEN}))
            );
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["email"], "guest@example.com");
            assert_eq!(body["data"]["full_name"], "Guest User");
            assert!(body["data"]["token"].is_string());
        }
        assert_eq!(ctx.store.count("user", &Filter::new()).await.unwrap(), 1);
        assert_eq!(ctx.store.count("userTokens", &Filter::new()).await.unwrap(), 2);
    }

    #[actix_rt::test]
    async fn welcome_email_escapes_the_name() {
        let ctx = common::context();
        let req = serde_json::from_value(json!({
            "email": "bo@example.com",
            "password": "secret123",
            "full_name": "<i>Bo</i> & co"
        }))
        .unwrap();
        ctx.state.users.register(req).await.unwrap();

        let emails = ctx.outbox.emails.lock().unwrap();
        let html = &emails.last().unwrap().html;
        assert!(html.contains("&lt;i&gt;Bo&lt;/i&gt; &amp; co"));
        assert!(!html.contains("<i>"));
    }

    #[actix_rt::test]
    async fn purge_drops_revoked_tokens() {
        let ctx = common::context();
        let (id, token) = ctx.signed_in("lea@example.com", "secret123").await;
        let caller = ctx.state.users.authenticate(&token).await.unwrap().unwrap();
        assert_eq!(caller.id_string(), id);

        ctx.state.users.logout(&caller).await.unwrap();
        assert_eq!(ctx.state.users.purge_expired_tokens().await.unwrap(), 1);
        assert!(ctx.state.users.authenticate(&token).await.unwrap().is_none());
    }

    #[actix_rt::test]
    async fn auth_routes_are_rate_limited() {
        let ctx = common::context_with(common::security_config(2));
        let app = test::init_service(App::new().configure(|cfg| ctx.state.configure(cfg))).await;

        for _ in 0..2 {
            let (status, _) = send!(
                app,
                test::TestRequest::post().uri("/userapp/auth/login").set_json(json!({}))
            );
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (status, _) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/login").set_json(json!({}))
        );
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        // other paths have their own budget
        let (status, _) = send!(
            app,
            test::TestRequest::post().uri("/userapp/auth/google").set_json(json!({}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
