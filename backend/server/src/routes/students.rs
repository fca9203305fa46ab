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
    models::{
        EnrollRequest, NewStudent, Progress, ProgressRequest, Student, StudentUpdate, StudentView,
    },
    state::AppState,
    utils::{parse_id, require_email, require_name},
};

pub async fn add_handler(
    State(state): State<Arc<AppState>>,
    Payload(payload): Payload<NewStudent>,
) -> Result<impl IntoResponse, AppError> {
    let student = Student::new(
        require_name(payload.name.as_deref(), "Student")?,
        require_email(payload.email.as_deref())?,
    );

    state.store.insert_student(&student).await?;
    info!("Added student {} <{}>", student.id, student.email);

    let student = state.enrollments.student_view(student).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Student added successfully!", "student": student })),
    ))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StudentView>>, AppError> {
    Ok(Json(state.enrollments.list_students_with_courses().await?))
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StudentView>, AppError> {
    let id = parse_id(&id, "Student")?;
    Ok(Json(state.enrollments.student(id).await?))
}

/// Omitted fields keep their stored value.
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(payload): Payload<StudentUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "Student")?;
    let mut student = state
        .store
        .student(id)
        .await?
        .ok_or(AppError::NotFound("Student"))?;

    if let Some(name) = payload.name.as_deref() {
        student.name = require_name(Some(name), "Student")?;
    }
    if let Some(email) = payload.email.as_deref() {
        student.email = require_email(Some(email))?;
    }

    if !state.store.update_student(&student).await? {
        return Err(AppError::NotFound("Student"));
    }
    info!("Updated student {id}");

    let student = state.enrollments.student_view(student).await?;
    Ok(Json(
        json!({ "message": "Student updated successfully!", "student": student }),
    ))
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "Student")?;

    if !state.store.delete_student(id).await? {
        return Err(AppError::NotFound("Student"));
    }
    info!("Deleted student {id} and their enrollments");

    Ok(Json(
        json!({ "message": "Student deleted successfully!", "id": id }),
    ))
}

pub async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<String>,
    Payload(payload): Payload<EnrollRequest>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = parse_id(&student_id, "Student")?;
    let course_id = parse_id(&payload.course_id, "Course")?;

    let student = state.enrollments.enroll(student_id, course_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Enrollment successful",
        "student": student,
    })))
}

pub async fn progress_handler(
    State(state): State<Arc<AppState>>,
    Payload(payload): Payload<ProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    // out-of-range progress is rejected before any lookup
    let progress = Progress::try_from(payload.progress)?;

    let student_id = parse_id(&payload.student_id, "Student")?;
    let course_id = parse_id(&payload.course_id, "Course for this student")?;

    let student = state
        .enrollments
        .set_progress(student_id, course_id, progress)
        .await?;

    Ok(Json(json!({
        "message": "Progress updated successfully",
        "student": student,
    })))
}
