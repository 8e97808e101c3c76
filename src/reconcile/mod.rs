//! Event reconciliation: action dispatch and the membership engine.

mod course;
mod dispatch;
mod membership;

pub use course::{academic_course_id, is_academic_course_id};
pub use dispatch::{
    CourseGroupDispatch, DefaultDispatch, GroupDispatch, GroupEventDispatcher,
    ImportGroupDispatch,
};
pub use membership::GroupReconciler;
