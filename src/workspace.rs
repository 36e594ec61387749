// workspace.rs

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error, info};
use mongodb::bson::{doc, to_bson};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::db::MongoDB;
use crate::models::workspace::new_invite_code;
use crate::models::{
    ActivityLogEntry, Notification, Role, Task, User, UserWorkspace, Workspace, WorkspaceMember,
};
use crate::storage;

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsPatch {
    pub is_public: Option<bool>,
    pub allow_invites: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub settings: Option<SettingsPatch>,
}

// ─── HELPERS ──────────────────────────────────────────────────────────────────

/// Invite codes must be unique across all workspaces; generation retries on
/// the (vanishingly rare) store collision.
async fn unique_invite_code(db: &MongoDB) -> Result<String, mongodb::error::Error> {
    let workspaces = db.db.collection::<Workspace>("workspaces");
    let mut code = new_invite_code();
    for _ in 0..5 {
        if workspaces
            .find_one(doc! { "invite_code": &code })
            .await?
            .is_none()
        {
            return Ok(code);
        }
        code = new_invite_code();
    }
    Err(mongodb::error::Error::custom(
        "could not generate a unique invite code",
    ))
}

fn server_error(message: &str) -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({ "success": false, "message": message }))
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

// POST /workspace/create
// The authenticated user becomes the owner and sole admin member; the
// membership is also pushed onto the user's denormalized workspace list.
pub async fn create_workspace(
    req: HttpRequest,
    data: web::Data<AppState>,
    info: web::Json<CreateWorkspaceRequest>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let name = info.name.trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "message": "Workspace name is required (max 100 characters)"
        }));
    }
    if info
        .description
        .as_deref()
        .map_or(false, |d| d.len() > MAX_DESCRIPTION_LEN)
    {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "message": "Description too long (max 500 characters)"
        }));
    }

    let mut workspace = Workspace::new(&current_user, name, info.description.clone());
    match unique_invite_code(&data.mongodb).await {
        Ok(code) => workspace.invite_code = Some(code),
        Err(e) => {
            error!("Error generating invite code: {}", e);
            return server_error("Failed to create workspace");
        }
    }

    let workspaces = data.mongodb.db.collection::<Workspace>("workspaces");
    if let Err(e) = workspaces.insert_one(&workspace).await {
        error!("Error creating workspace: {}", e);
        return server_error("Failed to create workspace");
    }
    debug!("Workspace created: {}", workspace.workspace_id);

    // Denormalized membership on the user document. The workspace write is
    // the authoritative one and is never rolled back if this fails.
    let membership = UserWorkspace {
        workspace_id: workspace.workspace_id.clone(),
        role: Role::Admin,
        joined_at: Utc::now(),
    };
    let membership_bson = match to_bson(&membership) {
        Ok(b) => b,
        Err(e) => {
            error!("Error serializing membership: {}", e);
            return server_error("Failed to create workspace");
        }
    };
    let users = data.mongodb.db.collection::<User>("users");
    if let Err(e) = users
        .update_one(
            doc! { "user_id": &current_user },
            doc! { "$push": { "workspaces": membership_bson } },
        )
        .await
    {
        error!("Error updating user workspace list: {}", e);
        return server_error("Failed to create workspace");
    }

    info!("Workspace {} created by {}", workspace.workspace_id, current_user);
    HttpResponse::Created().json(json!({
        "success": true,
        "message": "Workspace created successfully",
        "workspace": {
            "id": workspace.workspace_id,
            "name": workspace.name,
            "description": workspace.description,
            "invite_code": workspace.invite_code,
            "role": Role::Admin,
        }
    }))
}

// GET /workspace/my-workspaces
// Served from the user's denormalized list; workspaces deleted since the
// list was written are filtered out.
pub async fn my_workspaces(req: HttpRequest, data: web::Data<AppState>) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let users = data.mongodb.db.collection::<User>("users");
    let user = match users.find_one(doc! { "user_id": &current_user }).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "User not found" }));
        }
        Err(e) => {
            error!("Error fetching user: {}", e);
            return server_error("Failed to get workspaces");
        }
    };

    let workspaces_coll = data.mongodb.db.collection::<Workspace>("workspaces");
    let mut entries = Vec::new();
    for membership in &user.workspaces {
        match workspaces_coll
            .find_one(doc! { "workspace_id": &membership.workspace_id })
            .await
        {
            Ok(Some(ws)) => entries.push(json!({
                "id": ws.workspace_id,
                "name": ws.name,
                "description": ws.description,
                "role": membership.role,
                "member_count": ws.members.len(),
                "is_owner": ws.owner_id == current_user,
            })),
            Ok(None) => {} // stale reference to a deleted workspace
            Err(e) => {
                error!("Error fetching workspace {}: {}", membership.workspace_id, e);
                return server_error("Failed to get workspaces");
            }
        }
    }

    HttpResponse::Ok().json(json!({ "success": true, "workspaces": entries }))
}

// POST /workspace/join/{invite_code}
pub async fn join_workspace(
    req: HttpRequest,
    data: web::Data<AppState>,
    invite_code: web::Path<String>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let workspaces = data.mongodb.db.collection::<Workspace>("workspaces");
    let workspace = match workspaces
        .find_one(doc! { "invite_code": &*invite_code })
        .await
    {
        Ok(Some(ws)) => ws,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Invalid invite code" }));
        }
        Err(e) => {
            error!("Error looking up invite code: {}", e);
            return server_error("Failed to join workspace");
        }
    };

    if workspace.is_member(&current_user) {
        return HttpResponse::Conflict().json(json!({
            "success": false,
            "message": "You are already a member of this workspace"
        }));
    }

    let member = WorkspaceMember {
        user_id: current_user.clone(),
        role: Role::Member,
        joined_at: Utc::now(),
    };
    let member_bson = match to_bson(&member) {
        Ok(b) => b,
        Err(e) => {
            error!("Error serializing member: {}", e);
            return server_error("Failed to join workspace");
        }
    };
    if let Err(e) = workspaces
        .update_one(
            doc! { "workspace_id": &workspace.workspace_id },
            doc! { "$push": { "members": member_bson } },
        )
        .await
    {
        error!("Error adding member: {}", e);
        return server_error("Failed to join workspace");
    }

    let membership = UserWorkspace {
        workspace_id: workspace.workspace_id.clone(),
        role: Role::Member,
        joined_at: Utc::now(),
    };
    let membership_bson = match to_bson(&membership) {
        Ok(b) => b,
        Err(e) => {
            error!("Error serializing membership: {}", e);
            return server_error("Failed to join workspace");
        }
    };
    let users = data.mongodb.db.collection::<User>("users");
    if let Err(e) = users
        .update_one(
            doc! { "user_id": &current_user },
            doc! { "$push": { "workspaces": membership_bson } },
        )
        .await
    {
        error!("Error updating user workspace list: {}", e);
        return server_error("Failed to join workspace");
    }

    info!("User {} joined workspace {}", current_user, workspace.workspace_id);
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Successfully joined workspace",
        "workspace": {
            "id": workspace.workspace_id,
            "name": workspace.name,
            "description": workspace.description,
            "role": Role::Member,
        }
    }))
}

// GET /workspace/{workspace_id}
// Members only. The invite code is confidential: only admins see it.
pub async fn get_workspace(
    req: HttpRequest,
    data: web::Data<AppState>,
    workspace_id: web::Path<String>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let workspaces = data.mongodb.db.collection::<Workspace>("workspaces");
    let workspace = match workspaces
        .find_one(doc! { "workspace_id": &*workspace_id })
        .await
    {
        Ok(Some(ws)) => ws,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Workspace not found" }));
        }
        Err(e) => {
            error!("Error fetching workspace: {}", e);
            return server_error("Failed to get workspace");
        }
    };

    if !workspace.is_member(&current_user) {
        return HttpResponse::Forbidden()
            .json(json!({ "success": false, "message": "Access denied" }));
    }

    // Resolve member identities for display.
    let member_ids: Vec<String> = workspace.members.iter().map(|m| m.user_id.clone()).collect();
    let users = data.mongodb.db.collection::<User>("users");
    let mut cursor = match users.find(doc! { "user_id": { "$in": member_ids } }).await {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching members: {}", e);
            return server_error("Failed to get workspace");
        }
    };
    let mut profiles = std::collections::HashMap::new();
    while let Some(user_res) = cursor.next().await {
        match user_res {
            Ok(user) => {
                profiles.insert(user.user_id.clone(), (user.name, user.email));
            }
            Err(e) => {
                error!("Error iterating members: {}", e);
                return server_error("Failed to get workspace");
            }
        }
    }

    let members: Vec<_> = workspace
        .members
        .iter()
        .map(|m| {
            let (name, email) = profiles
                .get(&m.user_id)
                .cloned()
                .unwrap_or_else(|| (String::new(), String::new()));
            json!({
                "id": m.user_id,
                "name": name,
                "email": email,
                "role": m.role,
                "joined_at": m.joined_at,
            })
        })
        .collect();

    let user_role = workspace.role_of(&current_user);
    let invite_code = if workspace.has_permission(&current_user, Role::Admin) {
        workspace.invite_code.clone()
    } else {
        None
    };

    HttpResponse::Ok().json(json!({
        "success": true,
        "workspace": {
            "id": workspace.workspace_id,
            "name": workspace.name,
            "description": workspace.description,
            "owner_id": workspace.owner_id,
            "members": members,
            "user_role": user_role,
            "invite_code": invite_code,
            "settings": workspace.settings,
            "created_at": workspace.created_at,
        }
    }))
}

// PUT /workspace/{workspace_id}/settings
pub async fn update_settings(
    req: HttpRequest,
    data: web::Data<AppState>,
    workspace_id: web::Path<String>,
    info: web::Json<UpdateWorkspaceRequest>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let workspaces = data.mongodb.db.collection::<Workspace>("workspaces");
    let filter = doc! { "workspace_id": &*workspace_id };
    let workspace = match workspaces.find_one(filter.clone()).await {
        Ok(Some(ws)) => ws,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Workspace not found" }));
        }
        Err(e) => {
            error!("Error fetching workspace: {}", e);
            return server_error("Failed to update workspace");
        }
    };

    if !workspace.has_permission(&current_user, Role::Admin) {
        return HttpResponse::Forbidden()
            .json(json!({ "success": false, "message": "Admin access required" }));
    }

    let mut set_doc = doc! {};
    if let Some(name) = info.name.as_deref().map(str::trim) {
        if !name.is_empty() && name.len() <= MAX_NAME_LEN {
            set_doc.insert("name", name);
        }
    }
    if let Some(description) = &info.description {
        set_doc.insert("description", description);
    }
    if let Some(settings) = &info.settings {
        if let Some(is_public) = settings.is_public {
            set_doc.insert("settings.is_public", is_public);
        }
        if let Some(allow_invites) = settings.allow_invites {
            set_doc.insert("settings.allow_invites", allow_invites);
        }
    }
    if set_doc.is_empty() {
        return HttpResponse::BadRequest()
            .json(json!({ "success": false, "message": "No fields to update" }));
    }

    if let Err(e) = workspaces.update_one(filter.clone(), doc! { "$set": set_doc }).await {
        error!("Error updating workspace: {}", e);
        return server_error("Failed to update workspace");
    }

    match workspaces.find_one(filter).await {
        Ok(Some(ws)) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Workspace updated successfully",
            "workspace": {
                "id": ws.workspace_id,
                "name": ws.name,
                "description": ws.description,
                "settings": ws.settings,
            }
        })),
        _ => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Workspace updated successfully"
        })),
    }
}

// POST /workspace/{workspace_id}/regenerate-code
// Admin only. The previous code stops resolving immediately.
pub async fn regenerate_invite_code(
    req: HttpRequest,
    data: web::Data<AppState>,
    workspace_id: web::Path<String>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let workspaces = data.mongodb.db.collection::<Workspace>("workspaces");
    let filter = doc! { "workspace_id": &*workspace_id };
    let workspace = match workspaces.find_one(filter.clone()).await {
        Ok(Some(ws)) => ws,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Workspace not found" }));
        }
        Err(e) => {
            error!("Error fetching workspace: {}", e);
            return server_error("Failed to regenerate invite code");
        }
    };

    if !workspace.has_permission(&current_user, Role::Admin) {
        return HttpResponse::Forbidden()
            .json(json!({ "success": false, "message": "Admin access required" }));
    }

    let code = match unique_invite_code(&data.mongodb).await {
        Ok(code) => code,
        Err(e) => {
            error!("Error generating invite code: {}", e);
            return server_error("Failed to regenerate invite code");
        }
    };
    if let Err(e) = workspaces
        .update_one(filter, doc! { "$set": { "invite_code": &code } })
        .await
    {
        error!("Error storing invite code: {}", e);
        return server_error("Failed to regenerate invite code");
    }

    info!("Invite code regenerated for workspace {}", workspace.workspace_id);
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Invite code regenerated",
        "invite_code": code,
    }))
}

// DELETE /workspace/{workspace_id}
// Owner only (stricter than admin). Pulls the membership reference from
// every user. Tasks, notifications and activity entries are only removed
// when the cascade policy is enabled.
pub async fn delete_workspace(
    req: HttpRequest,
    data: web::Data<AppState>,
    workspace_id: web::Path<String>,
) -> impl Responder {
    let workspace_id = workspace_id.into_inner();
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let workspaces = data.mongodb.db.collection::<Workspace>("workspaces");
    let filter = doc! { "workspace_id": &workspace_id };
    let workspace = match workspaces.find_one(filter.clone()).await {
        Ok(Some(ws)) => ws,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Workspace not found" }));
        }
        Err(e) => {
            error!("Error fetching workspace: {}", e);
            return server_error("Failed to delete workspace");
        }
    };

    if workspace.owner_id != current_user {
        return HttpResponse::Forbidden().json(json!({
            "success": false,
            "message": "Not authorized to delete this workspace"
        }));
    }

    let users = data.mongodb.db.collection::<User>("users");
    if let Err(e) = users
        .update_many(
            doc! { "workspaces.workspace_id": &workspace_id },
            doc! { "$pull": { "workspaces": { "workspace_id": &workspace_id } } },
        )
        .await
    {
        error!("Error pulling workspace references: {}", e);
        return server_error("Failed to delete workspace");
    }

    if let Err(e) = workspaces.delete_one(filter).await {
        error!("Error deleting workspace: {}", e);
        return server_error("Failed to delete workspace");
    }
    info!("Workspace {} deleted by owner {}", workspace_id, current_user);

    if data.config.cascade_deletes {
        cascade_delete(data.get_ref(), &workspace_id).await;
    }

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Workspace deleted successfully"
    }))
}

/// Cascade policy: remove the workspace's tasks (including their stored
/// attachment files), notifications and activity entries. Best-effort, runs
/// after the workspace itself is gone.
async fn cascade_delete(data: &AppState, workspace_id: &str) {
    let tasks = data.mongodb.db.collection::<Task>("tasks");
    match tasks.find(doc! { "workspace_id": workspace_id }).await {
        Ok(mut cursor) => {
            while let Some(task_res) = cursor.next().await {
                if let Ok(task) = task_res {
                    for attachment in &task.attachments {
                        storage::remove_file(&attachment.path).await;
                    }
                }
            }
        }
        Err(e) => error!("Error listing tasks for cascade delete: {}", e),
    }
    if let Err(e) = tasks.delete_many(doc! { "workspace_id": workspace_id }).await {
        error!("Error cascade-deleting tasks: {}", e);
    }
    let notifications = data.mongodb.db.collection::<Notification>("notifications");
    if let Err(e) = notifications
        .delete_many(doc! { "workspace_id": workspace_id })
        .await
    {
        error!("Error cascade-deleting notifications: {}", e);
    }
    let activity = data.mongodb.db.collection::<ActivityLogEntry>("activity_log");
    if let Err(e) = activity
        .delete_many(doc! { "workspace_id": workspace_id })
        .await
    {
        error!("Error cascade-deleting activity entries: {}", e);
    }
}
