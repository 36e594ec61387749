use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use futures_util::StreamExt;
use log::error;
use mongodb::bson::doc;
use serde_json::json;

use crate::app_state::AppState;
use crate::models::Notification;

// GET /notifications
// Newest 50 for the current user.
pub async fn list_notifications(req: HttpRequest, data: web::Data<AppState>) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let notifications_coll = data.mongodb.db.collection::<Notification>("notifications");
    let mut cursor = match notifications_coll
        .find(doc! { "user_id": &current_user })
        .sort(doc! { "created_at": -1 })
        .limit(50)
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching notifications: {}", e);
            return HttpResponse::InternalServerError()
                .json(json!({ "success": false, "message": "Failed to load notifications" }));
        }
    };

    let mut notifications = Vec::new();
    while let Some(res) = cursor.next().await {
        match res {
            Ok(notification) => notifications.push(notification),
            Err(e) => {
                error!("Error iterating notifications: {}", e);
                return HttpResponse::InternalServerError()
                    .json(json!({ "success": false, "message": "Failed to load notifications" }));
            }
        }
    }

    HttpResponse::Ok().json(json!({ "success": true, "notifications": notifications }))
}

// PUT /notifications/{notification_id}/read
// Scoped to the current user; marking someone else's notification 404s.
pub async fn mark_notification_read(
    req: HttpRequest,
    data: web::Data<AppState>,
    notification_id: web::Path<String>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let notifications_coll = data.mongodb.db.collection::<Notification>("notifications");
    let filter = doc! { "notification_id": &*notification_id, "user_id": &current_user };
    match notifications_coll
        .update_one(filter.clone(), doc! { "$set": { "read": true } })
        .await
    {
        Ok(res) if res.matched_count == 0 => HttpResponse::NotFound()
            .json(json!({ "success": false, "message": "Notification not found" })),
        Ok(_) => match notifications_coll.find_one(filter).await {
            Ok(Some(notification)) => HttpResponse::Ok()
                .json(json!({ "success": true, "notification": notification })),
            _ => HttpResponse::Ok().json(json!({ "success": true })),
        },
        Err(e) => {
            error!("Error updating notification: {}", e);
            HttpResponse::InternalServerError()
                .json(json!({ "success": false, "message": "Failed to update notification" }))
        }
    }
}
