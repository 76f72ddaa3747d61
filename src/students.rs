use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use log::{debug, info};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use utoipa::ToSchema;

use crate::db::{Database, NewStudent, StudentRecord, crud};
use crate::error::{KioskError, Result};
use crate::gallery::{GalleryStore, validate_identity};

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$").expect("failed to build regex"));

/// 随机分配卡号时的最大尝试次数
const MAX_ID_ATTEMPTS: usize = 32;

/// 卡号，前端可能以数字或字符串形式提交
#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum CardId {
    Number(i64),
    Text(String),
}

impl CardId {
    /// 转换为图库使用的身份标识
    ///
    /// 卡号统一为整数的十进制形式，`"042"` 与 `42` 对应同一个身份
    pub fn into_identity(self) -> Result<String> {
        let identity = self.into_number()?.to_string();
        validate_identity(&identity)?;
        Ok(identity)
    }

    /// 转换为学生表中的整数卡号
    pub fn into_number(self) -> Result<i64> {
        let id = match self {
            Self::Number(n) => n,
            Self::Text(s) if s.trim().is_empty() => {
                return Err(KioskError::validation("card_id is required"));
            }
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| KioskError::validation(format!("card id must be numeric: {s}")))?,
        };
        if id <= 0 {
            return Err(KioskError::validation("card id must be positive"));
        }
        Ok(id)
    }
}

/// 添加学生的表单
///
/// 所有字段都是可选的，缺失字段在 [`StudentForm::validate`] 中报告
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct StudentForm {
    /// 指定卡号，不填则随机分配
    #[serde(default)]
    pub id: Option<CardId>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Reg_No", default)]
    pub reg_no: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(rename = "DOB", default)]
    pub dob: Option<String>,
    #[serde(rename = "Blood_Group", default)]
    pub blood_group: Option<String>,
    #[serde(rename = "Phone", default)]
    pub phone: Option<String>,
    #[serde(rename = "Dept", default)]
    pub dept: Option<String>,
    #[serde(rename = "Gender", default)]
    pub gender: Option<String>,
    #[serde(rename = "Organization", default)]
    pub organization: Option<String>,
    #[serde(rename = "Performance", default)]
    pub performance: Option<String>,
    #[serde(rename = "Remarks", default)]
    pub remarks: Option<String>,
}

impl StudentForm {
    /// 校验并规范化表单，返回 `(指定的卡号, 学生信息)`
    pub fn validate(self) -> Result<(Option<i64>, NewStudent)> {
        let id = self.id.map(CardId::into_number).transpose()?;

        let name = required(self.name, "Name")?.to_uppercase();
        let reg_no = required(self.reg_no, "Reg_No")?;
        let dob = required(self.dob, "DOB")?;
        let dob = dob
            .parse::<NaiveDate>()
            .map_err(|e| KioskError::validation(format!("invalid DOB '{dob}': {e}")))?;
        let blood_group = required(self.blood_group, "Blood_Group")?;
        let phone = required(self.phone, "Phone")?;
        if !PHONE.is_match(&phone) {
            return Err(KioskError::validation("Phone number must be 10 digits"));
        }

        let student = NewStudent {
            name,
            reg_no,
            dob,
            blood_group,
            phone,
            dept: required(self.dept, "Dept")?,
            gender: required(self.gender, "Gender")?,
            organization: required(self.organization, "Organization")?,
            performance: required(self.performance, "Performance")?,
            remarks: self.remarks.map(|s| s.trim().to_string()).unwrap_or_default(),
        };
        Ok((id, student))
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value.map(|s| s.trim().to_string()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(KioskError::validation(format!("{field} is required"))),
    }
}

/// 刷卡结果，找不到学生时 `success` 为 false，而不是报错
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CardScanResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentRecord>,
    pub message: String,
}

/// 添加学生
pub async fn create(db: &Database, form: StudentForm) -> Result<StudentRecord> {
    let (id, student) = form.validate()?;

    let mut tx = db.begin().await?;
    let id = match id {
        Some(id) => {
            if crud::student_exists(&mut *tx, id).await? {
                tx.rollback().await?;
                return Err(KioskError::Conflict(format!("card id {id} is already in use")));
            }
            id
        }
        None => match allocate_id(&mut tx).await {
            Ok(id) => id,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        },
    };

    match crud::add_student(&mut *tx, id, &student, Utc::now()).await {
        Ok(record) => {
            tx.commit().await?;
            info!("已添加学生 {} ({})", record.id, record.reg_no);
            Ok(record)
        }
        Err(e) => {
            tx.rollback().await?;
            debug!("添加学生失败，已回滚: {}", e);
            Err(classify_insert_error(e))
        }
    }
}

/// 随机选择一个未使用的六位卡号
async fn allocate_id(tx: &mut Transaction<'_, Sqlite>) -> Result<i64> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id: i64 = rand::rng().random_range(100_000..=999_999);
        if !crud::student_exists(&mut **tx, id).await? {
            return Ok(id);
        }
    }
    Err(KioskError::Conflict("no free card id available".to_string()))
}

fn classify_insert_error(err: sqlx::Error) -> KioskError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            let message = db_err.message();
            let field = if message.contains("reg_no") {
                "registration number"
            } else if message.contains("phone") {
                "phone number"
            } else {
                "card id"
            };
            return KioskError::Conflict(format!("a student with this {field} already exists"));
        }
    }
    err.into()
}

/// 根据卡号获取学生
pub async fn get(db: &Database, id: i64) -> Result<StudentRecord> {
    crud::get_student(db, id).await?.ok_or_else(|| KioskError::NotFound(format!("student {id}")))
}

/// 根据图库身份标识查找学生，标识不是数字时视为不存在
pub async fn find(db: &Database, identity: &str) -> Result<Option<StudentRecord>> {
    match identity.parse::<i64>() {
        Ok(id) => Ok(crud::get_student(db, id).await?),
        Err(_) => Ok(None),
    }
}

/// 刷卡查询
pub async fn scan_card(db: &Database, card_id: CardId) -> Result<CardScanResult> {
    let identity = card_id.into_identity()?;
    let result = match find(db, &identity).await? {
        Some(student) => CardScanResult {
            success: true,
            message: format!("Student found: {}", student.name),
            student: Some(student),
        },
        None => CardScanResult {
            success: false,
            student: None,
            message: format!("Student with card {identity} not found"),
        },
    };
    Ok(result)
}

/// 所有学生卡号，从小到大排列
pub async fn list_ids(db: &Database) -> Result<Vec<i64>> {
    Ok(crud::list_student_ids(db).await?)
}

/// 还没有人脸图片的学生卡号
pub async fn list_unassigned(db: &Database, gallery: &GalleryStore) -> Result<Vec<String>> {
    let stored = gallery.stored_identities();
    let ids = list_ids(db).await?;
    Ok(ids.into_iter().map(|id| id.to_string()).filter(|id| !stored.contains(id)).collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn form() -> StudentForm {
        serde_json::from_value(json!({
            "Name": "  ada lovelace ",
            "Reg_No": "REG001",
            "DOB": "2001-12-10",
            "Blood_Group": "O+",
            "Phone": "9876543210",
            "Dept": "CSE",
            "Gender": "Female",
            "Organization": "Analytical",
            "Performance": "Excellent",
        }))
        .unwrap()
    }

    #[test]
    fn test_validate_normalizes() {
        let (id, student) = form().validate().unwrap();
        assert_eq!(id, None);
        assert_eq!(student.name, "ADA LOVELACE");
        assert_eq!(student.dob, NaiveDate::from_ymd_opt(2001, 12, 10).unwrap());
        assert_eq!(student.remarks, "");
    }

    #[test]
    fn test_validate_missing_field() {
        let form = StudentForm { reg_no: None, ..form() };
        match form.validate() {
            Err(KioskError::Validation(msg)) => assert_eq!(msg, "Reg_No is required"),
            other => panic!("unexpected {other:?}"),
        }
        let form = StudentForm { dept: Some("   ".into()), ..form() };
        assert!(matches!(form.validate(), Err(KioskError::Validation(_))));
    }

    #[test]
    fn test_validate_bad_dob_and_phone() {
        let bad_dob = StudentForm { dob: Some("10/12/2001".into()), ..form() };
        assert!(matches!(bad_dob.validate(), Err(KioskError::Validation(_))));
        let bad_phone = StudentForm { phone: Some("12345".into()), ..form() };
        assert!(matches!(bad_phone.validate(), Err(KioskError::Validation(_))));
        let non_ascii = StudentForm { phone: Some("٠١٢٣٤٥٦٧٨٩".into()), ..form() };
        assert!(matches!(non_ascii.validate(), Err(KioskError::Validation(_))));
    }

    #[test]
    fn test_card_id() {
        let id: CardId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(id.clone().into_identity().unwrap(), "42");
        assert_eq!(id.into_number().unwrap(), 42);

        let id: CardId = serde_json::from_value(json!(" 123456 ")).unwrap();
        assert_eq!(id.into_number().unwrap(), 123456);

        let id: CardId = serde_json::from_value(json!("042")).unwrap();
        assert_eq!(id.into_identity().unwrap(), "42");

        let id: CardId = serde_json::from_value(json!("abc")).unwrap();
        assert!(id.clone().into_identity().is_err());
        assert!(id.into_number().is_err());

        let id: CardId = serde_json::from_value(json!("  ")).unwrap();
        match id.into_identity() {
            Err(KioskError::Validation(msg)) => assert_eq!(msg, "card_id is required"),
            other => panic!("unexpected {other:?}"),
        }

        let id: CardId = serde_json::from_value(json!("../x")).unwrap();
        assert!(id.into_identity().is_err());
    }
}
