//! 各实体的同步契约实现

pub mod hub;
pub mod partner_school;
pub mod section;
pub mod section_partner_school;
pub mod student;
pub mod student_enrollment;
