//! 积分累计服务
//!
//! ## 累计流程
//!
//! 1. 校验用户 ID -> 2. 规则评估 -> 3. 取用户锁，按每日上限裁剪
//!    -> 4. 同一工作单元内写流水并入队通知 -> 5. 提交后唤醒分发器

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use loyalty_shared::config::AccrualConfig;
use loyalty_shared::observability::metrics;
use rule_engine::{PointsTrigger, RuleEvaluator};

use super::dto::{AccrualRequest, AccrualResponse};
use super::ledger_service::Ledger;
use crate::error::{Result, parse_id};
use crate::models::{PointsEventDraft, PointsEventType};
use crate::repository::{LedgerStore, UnitOfWork};

/// 积分累计服务
pub struct AccrualService<S: LedgerStore> {
    ledger: Ledger<S>,
    evaluator: Arc<RuleEvaluator>,
    config: AccrualConfig,
}

impl<S: LedgerStore> AccrualService<S> {
    pub fn new(ledger: Ledger<S>, evaluator: Arc<RuleEvaluator>, config: AccrualConfig) -> Self {
        Self {
            ledger,
            evaluator,
            config,
        }
    }

    /// 累计积分
    ///
    /// 规则评估失败时不写入任何数据；按日上限裁剪到 0 的事件仍会入账（points = 0）。
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, event_type = %request.event_type)
    )]
    pub async fn accrue(&self, request: AccrualRequest) -> Result<AccrualResponse> {
        let user_id = parse_id("user_id", &request.user_id)?;

        let (trigger, requested) = match self
            .evaluator
            .evaluate_raw(&request.event_type, &request.payload)
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "规则评估失败");
                metrics::record_accrual(event_type_label(&request.event_type), "rejected", 0);
                return Err(e.into());
            }
        };
        let event_type = PointsEventType::from(&trigger);

        let mut uow = self.ledger.begin(user_id).await?;
        let points = self.apply_daily_cap(&mut uow, requested).await?;

        let mut draft = PointsEventDraft::new(user_id, event_type, points);
        if let Some(session_id) = &request.session_id {
            draft = draft.with_ref(session_id.clone());
        }
        let metadata = if points < requested {
            Some(with_requested_points(request.metadata, requested))
        } else {
            request.metadata
        };
        if let Some(metadata) = metadata {
            draft = draft.with_metadata(metadata);
        }

        let event = self.ledger.append_in(&mut uow, draft).await?;
        uow.commit().await?;
        self.ledger.signal().notify();

        let status = if points < requested { "capped" } else { "success" };
        metrics::record_accrual(event_type.as_str(), status, points);
        info!(
            event_id = %event.id,
            points,
            requested,
            "积分已入账"
        );

        Ok(AccrualResponse {
            event_id: event.id,
            points,
            session_id: request.session_id,
        })
    }

    /// 每日上限：min(points, max(0, cap - 今日已累计))
    async fn apply_daily_cap(&self, uow: &mut S::Uow, requested: i64) -> Result<i64> {
        let cap = self.evaluator.settings().max_points_per_day;
        if !self.config.enforce_daily_cap || cap <= 0 || requested <= 0 {
            return Ok(requested);
        }

        let accrued = uow.accrued_since(start_of_day(Utc::now())).await?;
        let remaining = (cap - accrued).max(0);
        if remaining < requested {
            warn!(cap, accrued, requested, "超过每日积分上限，已裁剪");
        }
        Ok(requested.min(remaining))
    }
}

/// 指标标签只取已知事件类型，其余归入 UNKNOWN
fn event_type_label(event_type: &str) -> &'static str {
    PointsTrigger::EVENT_TYPES
        .iter()
        .copied()
        .find(|known| *known == event_type)
        .unwrap_or("UNKNOWN")
}

/// UTC 当日零点
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// 在元数据中记录裁剪前的积分
fn with_requested_points(metadata: Option<Value>, requested: i64) -> Value {
    let mut map = match metadata {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
        None => Map::new(),
    };
    map.insert("requested_points".to_string(), Value::from(requested));
    Value::Object(map)
}
