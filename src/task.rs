// src/task.rs
//
// Every task operation runs the same pipeline: load the workspace, check
// membership, mutate the store, then best-effort side effects (activity log,
// notifications, broadcast). A failing side effect is logged and swallowed;
// the store mutation stands.

use actix::Addr;
use actix_multipart::Multipart;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use log::{error, info};
use mongodb::bson::{doc, to_bson};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::broadcast::{BroadcastServer, NotifyUser, WorkspaceEvent};
use crate::db::MongoDB;
use crate::models::{
    ActivityLogEntry, Comment, CreateTaskRequest, Notification, NotificationKind, Priority,
    Status, Task, UpdateTaskRequest, Workspace,
};
use crate::storage;

const MAX_UPLOAD_FILES: usize = 10;

fn server_error(message: &str) -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({ "success": false, "message": message }))
}

/// Standard prefix of every task operation: the workspace must exist and the
/// actor must be one of its members.
async fn workspace_for_member(
    db: &MongoDB,
    workspace_id: &str,
    user_id: &str,
) -> Result<Workspace, HttpResponse> {
    let workspaces = db.db.collection::<Workspace>("workspaces");
    match workspaces
        .find_one(doc! { "workspace_id": workspace_id })
        .await
    {
        Ok(Some(ws)) => {
            if ws.is_member(user_id) {
                Ok(ws)
            } else {
                Err(HttpResponse::Forbidden()
                    .json(json!({ "success": false, "message": "Access denied" })))
            }
        }
        Ok(None) => Err(HttpResponse::NotFound()
            .json(json!({ "success": false, "message": "Workspace not found" }))),
        Err(e) => {
            error!("Error checking membership: {}", e);
            Err(server_error("Internal server error"))
        }
    }
}

async fn fetch_task(db: &MongoDB, task_id: &str) -> Result<Task, HttpResponse> {
    let tasks = db.db.collection::<Task>("tasks");
    match tasks.find_one(doc! { "task_id": task_id }).await {
        Ok(Some(task)) => Ok(task),
        Ok(None) => Err(HttpResponse::NotFound()
            .json(json!({ "success": false, "message": "Task not found" }))),
        Err(e) => {
            error!("Error fetching task: {}", e);
            Err(server_error("Internal server error"))
        }
    }
}

/// Appends to the activity log. Append-only and best-effort: a failure here
/// never fails the mutation that triggered it.
async fn record_activity(
    db: &MongoDB,
    user_id: &str,
    workspace_id: &str,
    task_id: &str,
    action: &str,
    details: String,
) {
    let entry = ActivityLogEntry {
        entry_id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        workspace_id: workspace_id.to_string(),
        task_id: task_id.to_string(),
        action: action.to_string(),
        details: Some(details),
        created_at: Utc::now(),
    };
    let activity = db.db.collection::<ActivityLogEntry>("activity_log");
    if let Err(e) = activity.insert_one(&entry).await {
        error!("Failed to record activity: {}", e);
    }
}

/// Mirror of the workspace-room emit used after every mutation. Delivery is
/// fire-and-forget; a dead broadcast channel is a silent no-op.
fn emit(
    broadcast: &Addr<BroadcastServer>,
    workspace_id: &str,
    event: &'static str,
    payload: serde_json::Value,
) {
    broadcast.do_send(WorkspaceEvent {
        workspace_id: workspace_id.to_string(),
        event,
        payload,
    });
}

// GET /task/workspace/{workspace_id}
// Members only; newest-created first.
pub async fn list_workspace_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    workspace_id: web::Path<String>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };
    if let Err(resp) = workspace_for_member(&data.mongodb, &workspace_id, &current_user).await {
        return resp;
    }

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    let mut cursor = match tasks_coll
        .find(doc! { "workspace_id": &*workspace_id })
        .sort(doc! { "created_at": -1 })
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching tasks: {}", e);
            return server_error("Failed to get tasks");
        }
    };

    let mut tasks = Vec::new();
    while let Some(task_res) = cursor.next().await {
        match task_res {
            Ok(task) => tasks.push(task),
            Err(e) => {
                error!("Error iterating tasks: {}", e);
                return server_error("Failed to get tasks");
            }
        }
    }

    HttpResponse::Ok().json(json!({ "success": true, "tasks": tasks }))
}

// POST /task
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let title = payload.title.trim();
    if title.is_empty() {
        return HttpResponse::BadRequest()
            .json(json!({ "success": false, "message": "Task title is required" }));
    }

    if let Err(resp) =
        workspace_for_member(&data.mongodb, &payload.workspace_id, &current_user).await
    {
        return resp;
    }

    let task = Task {
        task_id: Uuid::new_v4().to_string(),
        workspace_id: payload.workspace_id.clone(),
        title: title.to_string(),
        description: payload.description.clone(),
        assignees: payload.assignees.clone().unwrap_or_default(),
        due_date: payload.due_date,
        priority: payload.priority.unwrap_or(Priority::Medium),
        status: payload.status.unwrap_or(Status::Todo),
        subtasks: payload.subtasks.clone().unwrap_or_default(),
        comments: Vec::new(),
        attachments: Vec::new(),
        tags: payload.tags.clone().unwrap_or_default(),
        created_by: current_user.clone(),
        created_at: Utc::now(),
    };

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll.insert_one(&task).await {
        error!("Error creating task: {}", e);
        return server_error("Failed to create task");
    }
    info!("Task {} created in workspace {}", task.task_id, task.workspace_id);

    record_activity(
        &data.mongodb,
        &current_user,
        &task.workspace_id,
        &task.task_id,
        "created",
        format!("Task \"{}\" was created", task.title),
    )
    .await;

    // One assignment notification per assignee; delivered to each assignee's
    // personal room as well.
    let notifications: Vec<Notification> = task
        .assignees
        .iter()
        .map(|assignee_id| Notification {
            notification_id: Uuid::new_v4().to_string(),
            user_id: assignee_id.clone(),
            workspace_id: task.workspace_id.clone(),
            task_id: Some(task.task_id.clone()),
            kind: NotificationKind::Assignment,
            message: format!("You have been assigned a new task: \"{}\"", task.title),
            read: false,
            created_at: Utc::now(),
        })
        .collect();
    if !notifications.is_empty() {
        let notifications_coll = data.mongodb.db.collection::<Notification>("notifications");
        if let Err(e) = notifications_coll.insert_many(&notifications).await {
            error!("Failed to create assignment notifications: {}", e);
        }
    }

    let task_json = serde_json::to_value(&task).unwrap_or_default();
    emit(
        &data.broadcast,
        &task.workspace_id,
        "taskCreated",
        json!({
            "task": task_json,
            "user_id": current_user,
            "workspace_id": task.workspace_id,
        }),
    );
    for notification in &notifications {
        data.broadcast.do_send(NotifyUser {
            user_id: notification.user_id.clone(),
            payload: serde_json::to_value(notification).unwrap_or_default(),
        });
    }

    HttpResponse::Created().json(json!({
        "success": true,
        "message": "Task created successfully",
        "task": task,
    }))
}

// GET /task/{task_id}
pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let task = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Err(resp) =
        workspace_for_member(&data.mongodb, &task.workspace_id, &current_user).await
    {
        return resp;
    }

    HttpResponse::Ok().json(json!({ "success": true, "task": task }))
}

// PUT /task/{task_id}
// Any workspace member may edit any task; only fields present in the patch
// are merged.
pub async fn update_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let task = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Err(resp) =
        workspace_for_member(&data.mongodb, &task.workspace_id, &current_user).await
    {
        return resp;
    }

    let set_doc = match payload.update_doc() {
        Ok(doc) => doc,
        Err(e) => {
            error!("Error building update document: {}", e);
            return server_error("Failed to update task");
        }
    };
    if set_doc.is_empty() {
        return HttpResponse::BadRequest()
            .json(json!({ "success": false, "message": "No fields to update" }));
    }

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll
        .update_one(doc! { "task_id": &*task_id }, doc! { "$set": set_doc })
        .await
    {
        error!("Error updating task: {}", e);
        return server_error("Failed to update task");
    }

    let updated = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };

    record_activity(
        &data.mongodb,
        &current_user,
        &updated.workspace_id,
        &updated.task_id,
        "updated",
        format!("Task \"{}\" was updated", updated.title),
    )
    .await;

    let task_json = serde_json::to_value(&updated).unwrap_or_default();
    emit(
        &data.broadcast,
        &updated.workspace_id,
        "taskUpdated",
        json!({
            "task": task_json,
            "user_id": current_user,
            "workspace_id": updated.workspace_id,
        }),
    );

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Task updated successfully",
        "task": updated,
    }))
}

// DELETE /task/{task_id}
// The activity entry is written before removal so the log keeps the task's
// title; stored attachment files are removed best-effort afterwards.
pub async fn delete_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> impl Responder {
    let task_id = task_id.into_inner();
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let task = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Err(resp) =
        workspace_for_member(&data.mongodb, &task.workspace_id, &current_user).await
    {
        return resp;
    }

    record_activity(
        &data.mongodb,
        &current_user,
        &task.workspace_id,
        &task.task_id,
        "deleted",
        format!("Task \"{}\" was deleted", task.title),
    )
    .await;

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll.delete_one(doc! { "task_id": &task_id }).await {
        error!("Error deleting task: {}", e);
        return server_error("Failed to delete task");
    }
    info!("Task {} deleted from workspace {}", task_id, task.workspace_id);

    for attachment in &task.attachments {
        storage::remove_file(&attachment.path).await;
    }

    emit(
        &data.broadcast,
        &task.workspace_id,
        "taskDeleted",
        json!({
            "task_id": task_id,
            "user_id": current_user,
            "workspace_id": task.workspace_id,
        }),
    );

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Task deleted successfully"
    }))
}

// POST /task/{task_id}/upload
pub async fn upload_attachments(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    mut payload: Multipart,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let task = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Err(resp) =
        workspace_for_member(&data.mongodb, &task.workspace_id, &current_user).await
    {
        return resp;
    }

    let mut attachments = Vec::new();
    loop {
        match payload.try_next().await {
            Ok(Some(mut field)) => {
                if attachments.len() >= MAX_UPLOAD_FILES {
                    return HttpResponse::BadRequest().json(json!({
                        "success": false,
                        "message": "Too many files (max 10)"
                    }));
                }
                match storage::save_field(&data.config.upload_dir, &mut field).await {
                    Ok(attachment) => attachments.push(attachment),
                    Err(e) => {
                        error!("Error storing upload: {}", e);
                        return server_error("Failed to upload files");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Malformed multipart payload: {}", e);
                return HttpResponse::BadRequest().json(json!({
                    "success": false,
                    "message": "Invalid upload payload"
                }));
            }
        }
    }

    if attachments.is_empty() {
        return HttpResponse::BadRequest()
            .json(json!({ "success": false, "message": "No files uploaded" }));
    }

    let attachments_bson = match to_bson(&attachments) {
        Ok(b) => b,
        Err(e) => {
            error!("Error serializing attachments: {}", e);
            return server_error("Failed to upload files");
        }
    };
    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll
        .update_one(
            doc! { "task_id": &*task_id },
            doc! { "$push": { "attachments": { "$each": attachments_bson } } },
        )
        .await
    {
        error!("Error saving attachments: {}", e);
        return server_error("Failed to upload files");
    }

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Files uploaded successfully",
        "attachments": attachments,
    }))
}

// DELETE /task/{task_id}/attachment/{filename}
pub async fn delete_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (task_id, filename) = path.into_inner();
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let task = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Err(resp) =
        workspace_for_member(&data.mongodb, &task.workspace_id, &current_user).await
    {
        return resp;
    }

    let attachment = match task.attachments.iter().find(|a| a.filename == filename) {
        Some(attachment) => attachment,
        None => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Attachment not found" }));
        }
    };

    // Stored-file removal is best-effort; the record goes away regardless.
    storage::remove_file(&attachment.path).await;

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll
        .update_one(
            doc! { "task_id": &task_id },
            doc! { "$pull": { "attachments": { "filename": &filename } } },
        )
        .await
    {
        error!("Error removing attachment record: {}", e);
        return server_error("Failed to delete attachment");
    }

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Attachment deleted successfully"
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub content: String,
}

// POST /task/{task_id}/comments
pub async fn add_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<AddCommentRequest>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let content = payload.content.trim();
    if content.is_empty() {
        return HttpResponse::BadRequest()
            .json(json!({ "success": false, "message": "Comment content is required" }));
    }

    let task = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Err(resp) =
        workspace_for_member(&data.mongodb, &task.workspace_id, &current_user).await
    {
        return resp;
    }

    let comment = Comment {
        comment_id: Uuid::new_v4().to_string(),
        content: content.to_string(),
        author_id: current_user.clone(),
        created_at: Utc::now(),
    };
    let comment_bson = match to_bson(&comment) {
        Ok(b) => b,
        Err(e) => {
            error!("Error serializing comment: {}", e);
            return server_error("Failed to add comment");
        }
    };
    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll
        .update_one(
            doc! { "task_id": &*task_id },
            doc! { "$push": { "comments": comment_bson } },
        )
        .await
    {
        error!("Error adding comment: {}", e);
        return server_error("Failed to add comment");
    }

    record_activity(
        &data.mongodb,
        &current_user,
        &task.workspace_id,
        &task.task_id,
        "commented",
        format!("Comment added on task \"{}\"", task.title),
    )
    .await;

    emit(
        &data.broadcast,
        &task.workspace_id,
        "commentAdded",
        json!({
            "task_id": task.task_id,
            "comment": comment,
            "user_id": current_user,
            "workspace_id": task.workspace_id,
        }),
    );

    HttpResponse::Created().json(json!({
        "success": true,
        "message": "Comment added successfully",
        "comment": comment,
    }))
}

// DELETE /task/{task_id}/comments/{comment_id}
// Comment deletion is author-owned: workspace admins are denied too.
pub async fn delete_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (task_id, comment_id) = path.into_inner();
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let task = match fetch_task(&data.mongodb, &task_id).await {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Err(resp) =
        workspace_for_member(&data.mongodb, &task.workspace_id, &current_user).await
    {
        return resp;
    }

    let comment = match task.comments.iter().find(|c| c.comment_id == comment_id) {
        Some(comment) => comment,
        None => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Comment not found" }));
        }
    };
    if comment.author_id != current_user {
        return HttpResponse::Forbidden().json(json!({
            "success": false,
            "message": "You can only delete your own comments"
        }));
    }

    let tasks_coll = data.mongodb.db.collection::<Task>("tasks");
    if let Err(e) = tasks_coll
        .update_one(
            doc! { "task_id": &task_id },
            doc! { "$pull": { "comments": { "comment_id": &comment_id } } },
        )
        .await
    {
        error!("Error deleting comment: {}", e);
        return server_error("Failed to delete comment");
    }

    record_activity(
        &data.mongodb,
        &current_user,
        &task.workspace_id,
        &task.task_id,
        "comment deleted",
        format!("Comment deleted on task \"{}\"", task.title),
    )
    .await;

    emit(
        &data.broadcast,
        &task.workspace_id,
        "commentDeleted",
        json!({
            "task_id": task_id,
            "comment_id": comment_id,
            "user_id": current_user,
            "workspace_id": task.workspace_id,
        }),
    );

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Comment deleted successfully"
    }))
}
