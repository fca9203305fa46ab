use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;

use super::Payload;
use crate::{
    error::AppError,
    models::{Course, CourseUpdate, CourseView, NewCourse, StudentContact},
    state::AppState,
    utils::{optional_text, parse_id, require_name},
};

pub async fn add_handler(
    State(state): State<Arc<AppState>>,
    Payload(payload): Payload<NewCourse>,
) -> Result<impl IntoResponse, AppError> {
    let course = Course::new(
        require_name(payload.name.as_deref(), "Course")?,
        optional_text(payload.description.as_deref()),
    );

    state.store.insert_course(&course).await?;
    info!("Added course {} ({})", course.id, course.name);

    let course = state.enrollments.course_view(course).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Course added successfully",
            "course": course,
        })),
    ))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CourseView>>, AppError> {
    Ok(Json(state.enrollments.list_courses().await?))
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
) -> Result<Json<CourseView>, AppError> {
    let course_id = parse_id(&course_id, "Course")?;
    Ok(Json(state.enrollments.course(course_id).await?))
}

/// `createdAt` is never touched. Omitted fields keep their stored value; an empty
/// description clears it.
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(payload): Payload<CourseUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "Course")?;
    let mut course = state
        .store
        .course(id)
        .await?
        .ok_or(AppError::NotFound("Course"))?;

    if let Some(name) = payload.name.as_deref() {
        course.name = require_name(Some(name), "Course")?;
    }
    if payload.description.is_some() {
        course.description = optional_text(payload.description.as_deref());
    }

    if !state.store.update_course(&course).await? {
        return Err(AppError::NotFound("Course"));
    }
    info!("Updated course {id}");

    let course = state.enrollments.course_view(course).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Course updated successfully",
        "course": course,
    })))
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "Course")?;

    if !state.store.delete_course(id).await? {
        return Err(AppError::NotFound("Course"));
    }
    info!("Deleted course {id} and its enrollments");

    Ok(Json(
        json!({ "message": "Course deleted successfully", "id": id }),
    ))
}

pub async fn students_handler(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<StudentContact>>, AppError> {
    let course_id = parse_id(&course_id, "Course")?;
    Ok(Json(state.enrollments.list_enrolled_students(course_id).await?))
}

pub async fn remove_student_handler(
    State(state): State<Arc<AppState>>,
    Path((course_id, student_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = parse_id(&course_id, "Course")?;

    // an unparseable student id cannot be enrolled, so removing it is a no-op
    if let Ok(student_id) = parse_id(&student_id, "Student") {
        state
            .enrollments
            .remove_student_from_course(course_id, student_id)
            .await?;
    } else {
        state.enrollments.require_course(course_id).await?;
    }

    Ok(Json(json!({ "success": true })))
}
