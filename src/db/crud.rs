use chrono::{DateTime, Utc};
use sqlx::{Executor, Result, Sqlite};

use super::{NewStudent, ProfileRecord, StudentRecord};

/// 添加学生记录
pub async fn add_student<'c, E>(
    executor: E,
    id: i64,
    student: &NewStudent,
    created_at: DateTime<Utc>,
) -> Result<StudentRecord>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, StudentRecord>(
        r#"
        INSERT INTO student (
            id, name, reg_no, dob, blood_group, phone, dept,
            gender, organization, performance, remarks, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&student.name)
    .bind(&student.reg_no)
    .bind(student.dob)
    .bind(&student.blood_group)
    .bind(&student.phone)
    .bind(&student.dept)
    .bind(&student.gender)
    .bind(&student.organization)
    .bind(&student.performance)
    .bind(&student.remarks)
    .bind(created_at)
    .fetch_one(executor)
    .await
}

/// 检查卡号是否已被使用
pub async fn student_exists<'c, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM student WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

/// 根据卡号获取学生记录
pub async fn get_student<'c, E>(executor: E, id: i64) -> Result<Option<StudentRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, StudentRecord>(
        r#"
        SELECT * FROM student WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// 获取所有学生卡号
pub async fn list_student_ids<'c, E>(executor: E) -> Result<Vec<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        SELECT id FROM student ORDER BY id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 添加机构信息
pub async fn add_profile<'c, E>(
    executor: E,
    institution_name: &str,
    logo_path: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<ProfileRecord>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, ProfileRecord>(
        r#"
        INSERT INTO profile (institution_name, logo_path, created_at)
        VALUES (?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(institution_name)
    .bind(logo_path)
    .bind(created_at)
    .fetch_one(executor)
    .await
}

/// 获取最新的机构信息
pub async fn latest_profile<'c, E>(executor: E) -> Result<Option<ProfileRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, ProfileRecord>(
        r#"
        SELECT * FROM profile ORDER BY created_at DESC, id DESC LIMIT 1
        "#,
    )
    .fetch_optional(executor)
    .await
}
