// ==========================================
// 免疫接种排程系统 - 外部目录接口
// ==========================================
// 职责: 患者 / 医生存在性校验（只读）
// 说明: 身份数据由外部系统维护，本模块只定义 trait 与两个内置实现
// ==========================================

use std::collections::HashSet;

/// 患者目录
pub trait PatientDirectory: Send + Sync {
    fn patient_exists(&self, patient_id: &str) -> bool;
}

/// 医生目录
pub trait DoctorDirectory: Send + Sync {
    fn doctor_exists(&self, doctor_id: &str) -> bool;
}

/// 接受任意ID的目录（未接入外部身份系统时使用）
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllDirectory;

impl PatientDirectory for AllowAllDirectory {
    fn patient_exists(&self, patient_id: &str) -> bool {
        !patient_id.trim().is_empty()
    }
}

impl DoctorDirectory for AllowAllDirectory {
    fn doctor_exists(&self, doctor_id: &str) -> bool {
        !doctor_id.trim().is_empty()
    }
}

/// 固定ID集合的目录
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    patients: HashSet<String>,
    doctors: HashSet<String>,
}

impl StaticDirectory {
    pub fn new<P, D, S1, S2>(patients: P, doctors: D) -> Self
    where
        P: IntoIterator<Item = S1>,
        D: IntoIterator<Item = S2>,
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            patients: patients.into_iter().map(Into::into).collect(),
            doctors: doctors.into_iter().map(Into::into).collect(),
        }
    }
}

impl PatientDirectory for StaticDirectory {
    fn patient_exists(&self, patient_id: &str) -> bool {
        self.patients.contains(patient_id)
    }
}

impl DoctorDirectory for StaticDirectory {
    fn doctor_exists(&self, doctor_id: &str) -> bool {
        self.doctors.contains(doctor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_directory_membership() {
        let dir = StaticDirectory::new(["p1", "p2"], ["doc1"]);
        assert!(dir.patient_exists("p1"));
        assert!(!dir.patient_exists("p3"));
        assert!(dir.doctor_exists("doc1"));
        assert!(!dir.doctor_exists("p1"));
    }

    #[test]
    fn test_allow_all_rejects_blank_ids() {
        let dir = AllowAllDirectory;
        assert!(dir.patient_exists("anyone"));
        assert!(!dir.patient_exists("  "));
        assert!(!dir.doctor_exists(""));
    }
}
