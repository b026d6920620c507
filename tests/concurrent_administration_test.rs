// ==========================================
// 并发接种测试
// ==========================================
// 职责: 验证并发接种下库存不超扣、状态不重复迁移；并发创建时编码不重复
// ==========================================


use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use immunization_core::api::ApiError;
use immunization_core::domain::DoseState;
use immunization_core::AppState;
use test_helpers::*;

/// 每个线程一条结果: Ok 或错误
fn run_concurrently<T, F>(workers: usize, job: F) -> Vec<Result<T, ApiError>>
where
    T: Send + 'static,
    F: Fn(usize) -> Result<T, ApiError> + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(workers));
    let job = Arc::new(job);
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let barrier = barrier.clone();
            let job = job.clone();
            thread::spawn(move || {
                barrier.wait();
                job(i)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("线程异常退出"))
        .collect()
}

#[test]
fn test_last_dose_goes_to_exactly_one_of_two_connections() {
    let (_tmp, path, state) = setup();
    let vaccine = seed_vaccine(&state, "乙肝疫苗", 3);
    let lot = seed_lot(&state, &vaccine.vaccine_id, "HB-LAST", 1);
    let first = state
        .schedule_api
        .create_schedule(PATIENT_A, &vaccine.vaccine_id, 1, today(), None)
        .unwrap();
    let second = state
        .schedule_api
        .create_schedule(PATIENT_B, &vaccine.vaccine_id, 1, today(), None)
        .unwrap();

    // 两个独立连接，由 SQLite 写锁串行化
    let states = Arc::new(vec![open_state(&path, today()), open_state(&path, today())]);
    let ids = Arc::new(vec![first.schedule_id.clone(), second.schedule_id.clone()]);

    let results = {
        let states = states.clone();
        let ids = ids.clone();
        run_concurrently(2, move |i| {
            states[i]
                .administration_api
                .administer(&ids[i], &administer_request("HB-LAST"))
        })
    };

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "结果: {:?}", results);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(
        matches!(failure, ApiError::ResourceExhausted(_)),
        "失败方应为库存耗尽: {:?}",
        failure
    );

    let lot_after = state.inventory_api.get_lot(&lot.lot_id).unwrap();
    assert_eq!(lot_after.quantity_available, 0);
    assert_eq!(lot_after.quantity_used, 1);

    let administered = [&first, &second]
        .iter()
        .map(|s| state.schedule_api.get_schedule(&s.schedule_id).unwrap())
        .filter(|s| s.state == DoseState::Administered)
        .count();
    assert_eq!(administered, 1);
}

#[test]
fn test_shared_state_never_overdraws_lot() {
    let (_tmp, _path, state) = setup();
    let vaccine = seed_vaccine(&state, "流感疫苗", 1);
    let lot = seed_lot(&state, &vaccine.vaccine_id, "FLU-POOL", 5);

    let mut ids = Vec::new();
    for patient in [PATIENT_A, PATIENT_B] {
        for _ in 0..4 {
            ids.push(
                state
                    .schedule_api
                    .create_schedule(patient, &vaccine.vaccine_id, 1, today(), None)
                    .unwrap()
                    .schedule_id,
            );
        }
    }

    let shared: Arc<AppState> = Arc::new(state);
    let results = {
        let shared = shared.clone();
        let ids = Arc::new(ids);
        run_concurrently(8, move |i| {
            shared
                .administration_api
                .administer(&ids[i], &administer_request("FLU-POOL"))
        })
    };

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ApiError::ResourceExhausted(_))));

    let lot_after = shared.inventory_api.get_lot(&lot.lot_id).unwrap();
    assert_eq!(lot_after.quantity_available, 0);
    assert_eq!(lot_after.quantity_used, 5);
}

#[test]
fn test_same_schedule_administered_once_under_contention() {
    let (_tmp, path, state) = setup();
    let vaccine = seed_vaccine(&state, "乙肝疫苗", 3);
    let lot = seed_lot(&state, &vaccine.vaccine_id, "HB-01", 10);
    let schedule = state
        .schedule_api
        .create_schedule(PATIENT_A, &vaccine.vaccine_id, 1, today(), None)
        .unwrap();

    let states = Arc::new(vec![
        open_state(&path, today()),
        open_state(&path, today()),
        open_state(&path, today()),
    ]);
    let schedule_id = schedule.schedule_id.clone();
    let results = {
        let states = states.clone();
        run_concurrently(3, move |i| {
            states[i]
                .administration_api
                .administer(&schedule_id, &administer_request("HB-01"))
        })
    };

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ApiError::StateConflict { .. })));

    let lot_after = state.inventory_api.get_lot(&lot.lot_id).unwrap();
    assert_eq!(lot_after.quantity_available, 9);
    assert_eq!(lot_after.quantity_used, 1);
}

#[test]
fn test_parallel_creates_get_distinct_schedule_codes() {
    let (_tmp, path, state) = setup();
    let vaccine = seed_vaccine(&state, "乙肝疫苗", 3);
    let vaccine_id = Arc::new(vaccine.vaccine_id.clone());

    // 共享连接与独立连接各跑若干轮
    let shared = Arc::new(state);
    let separate = Arc::new((0..4).map(|_| open_state(&path, today())).collect::<Vec<_>>());

    for round in 0..5 {
        let results = {
            let shared = shared.clone();
            let vaccine_id = vaccine_id.clone();
            run_concurrently(8, move |i| {
                let patient = if i % 2 == 0 { PATIENT_A } else { PATIENT_B };
                shared
                    .schedule_api
                    .create_schedule(patient, &vaccine_id, 1, today(), None)
            })
        };
        assert!(results.iter().all(|r| r.is_ok()), "第 {} 轮: {:?}", round, results);

        let results = {
            let separate = separate.clone();
            let vaccine_id = vaccine_id.clone();
            run_concurrently(4, move |i| {
                separate[i]
                    .schedule_api
                    .create_schedule(PATIENT_A, &vaccine_id, 2, today(), None)
            })
        };
        assert!(results.iter().all(|r| r.is_ok()), "第 {} 轮: {:?}", round, results);
    }

    let all = shared.schedule_api.list_by_vaccine(&vaccine.vaccine_id).unwrap();
    assert_eq!(all.len(), 5 * 12);
    let codes: HashSet<_> = all.iter().map(|s| s.schedule_code.as_str()).collect();
    assert_eq!(codes.len(), all.len());
    assert!(codes.contains("VSCH2403150060"));
}

#[test]
fn test_parallel_vaccine_creates_get_distinct_codes() {
    let (_tmp, _path, state) = setup();
    let shared = Arc::new(state);

    let results = {
        let shared = shared.clone();
        run_concurrently(8, move |i| {
            shared
                .vaccine_api
                .create_vaccine(&new_vaccine(&format!("疫苗{}", i), 2))
        })
    };
    assert!(results.iter().all(|r| r.is_ok()), "结果: {:?}", results);

    let codes: HashSet<_> = shared
        .vaccine_api
        .list_all()
        .unwrap()
        .into_iter()
        .map(|v| v.vaccine_code)
        .collect();
    assert_eq!(codes.len(), 8);
    assert!(codes.contains("VAC0008"));
}
