use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRequest,
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};

use crate::{error::AppError, state::AppState};

pub mod courses;
pub mod students;

/// JSON body extractor whose rejections surface as [`AppError::MalformedPayload`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct Payload<T>(pub T);

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(status_handler))
        .route("/students", get(students::list_handler))
        .route("/students/add", post(students::add_handler))
        .route("/students/progress", put(students::progress_handler))
        .route("/students/update/{id}", put(students::update_handler))
        .route("/students/delete/{id}", delete(students::delete_handler))
        .route("/students/enroll/{student_id}", post(students::enroll_handler))
        .route("/students/{id}", get(students::get_handler))
        .route("/courses", get(courses::list_handler))
        .route("/courses/add", post(courses::add_handler))
        .route("/courses/update/{id}", put(courses::update_handler))
        .route("/courses/delete/{id}", delete(courses::delete_handler))
        .route("/courses/{course_id}", get(courses::get_handler))
        .route("/courses/{course_id}/students", get(courses::students_handler))
        .route(
            "/courses/{course_id}/remove-student/{student_id}",
            post(courses::remove_student_handler),
        )
}

pub async fn status_handler() -> Json<Value> {
    Json(json!({ "message": "Student Course Management System API is running" }))
}
