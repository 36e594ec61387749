use actix_web::{web, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::error;
use mongodb::bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::User;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub fn create_jwt(user_id: &str, secret: &str) -> String {
    let expiration = Utc::now() + Duration::days(7);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .unwrap_or_default()
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn looks_like_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

// POST /auth/signup
pub async fn signup(
    data: web::Data<AppState>,
    signup_info: web::Json<SignupRequest>,
) -> impl Responder {
    let name = signup_info.name.trim();
    let email = signup_info.email.trim().to_lowercase();

    if name.is_empty() || email.is_empty() || signup_info.password.is_empty() {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "message": "Name, email and password are required"
        }));
    }
    if !looks_like_email(&email) {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "message": "Invalid email address"
        }));
    }
    if signup_info.password.len() < MIN_PASSWORD_LEN {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "message": "Password must be at least 6 characters"
        }));
    }

    let users = data.mongodb.db.collection::<User>("users");
    match users.find_one(doc! { "email": &email }).await {
        Ok(Some(_)) => {
            return HttpResponse::Conflict().json(json!({
                "success": false,
                "message": "Email already in use"
            }));
        }
        Ok(None) => {}
        Err(e) => {
            error!("Error checking existing email: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "success": false,
                "message": "Server error"
            }));
        }
    }

    let hashed_password = match hash(&signup_info.password, DEFAULT_COST) {
        Ok(h) => h,
        Err(e) => {
            error!("Error hashing password: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "success": false,
                "message": "Server error"
            }));
        }
    };

    let new_user = User {
        user_id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.clone(),
        password: hashed_password,
        workspaces: Vec::new(),
        created_at: Utc::now(),
    };

    if let Err(e) = users.insert_one(&new_user).await {
        error!("Error creating user: {}", e);
        return HttpResponse::InternalServerError().json(json!({
            "success": false,
            "message": "Server error"
        }));
    }

    let token = create_jwt(&new_user.user_id, &data.config.jwt_secret);
    HttpResponse::Created().json(json!({
        "success": true,
        "token": token,
        "user": {
            "id": new_user.user_id,
            "name": new_user.name,
            "email": new_user.email,
        }
    }))
}

// POST /auth/login
pub async fn login(
    data: web::Data<AppState>,
    login_info: web::Json<LoginRequest>,
) -> impl Responder {
    let email = login_info.email.trim().to_lowercase();
    let users = data.mongodb.db.collection::<User>("users");

    let user = match users.find_one(doc! { "email": &email }).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(json!({
                "success": false,
                "message": "Invalid credentials"
            }));
        }
        Err(e) => {
            error!("Error logging in: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "success": false,
                "message": "Server error"
            }));
        }
    };

    if !verify(&login_info.password, &user.password).unwrap_or(false) {
        return HttpResponse::Unauthorized().json(json!({
            "success": false,
            "message": "Invalid credentials"
        }));
    }

    let token = create_jwt(&user.user_id, &data.config.jwt_secret);
    HttpResponse::Ok().json(json!({
        "success": true,
        "token": token,
        "user": {
            "id": user.user_id,
            "name": user.name,
            "email": user.email,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip_preserves_subject() {
        let token = create_jwt("user-42", "test-secret");
        let claims = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = create_jwt("user-42", "test-secret");
        assert!(validate_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("alice@example.com"));
        assert!(looks_like_email("a.b+c@sub.domain.org"));
        assert!(!looks_like_email("not-an-email"));
        assert!(!looks_like_email("missing@tld"));
        assert!(!looks_like_email("spaces in@example.com"));
    }
}
