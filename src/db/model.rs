use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// 学生记录
///
/// JSON 字段名与前端保持一致
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow, ToSchema)]
pub struct StudentRecord {
    /// 学生卡号，同时也是人脸图库中的身份标识
    pub id: i64,
    #[serde(rename = "Name")]
    pub name: String,
    /// 学号，唯一
    #[serde(rename = "Reg_No")]
    pub reg_no: String,
    #[serde(rename = "DOB")]
    pub dob: NaiveDate,
    #[serde(rename = "Blood_Group")]
    pub blood_group: String,
    /// 手机号，唯一
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Dept")]
    pub dept: String,
    #[serde(rename = "Gender")]
    pub gender: String,
    #[serde(rename = "Organization")]
    pub organization: String,
    #[serde(rename = "Performance")]
    pub performance: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "Created_At")]
    pub created_at: DateTime<Utc>,
}

/// 校验后待插入的学生信息
#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub name: String,
    pub reg_no: String,
    pub dob: NaiveDate,
    pub blood_group: String,
    pub phone: String,
    pub dept: String,
    pub gender: String,
    pub organization: String,
    pub performance: String,
    pub remarks: String,
}

/// 机构信息，只有最新的一条有效
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProfileRecord {
    pub id: i64,
    pub institution_name: String,
    /// 上传目录中的 logo 文件名
    pub logo_path: Option<String>,
    pub created_at: DateTime<Utc>,
}
