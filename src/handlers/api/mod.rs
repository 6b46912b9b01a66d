pub mod ratio;

pub use ratio::{
    cache_status,
    convert_price,
    delete_config,
    get_config,
    health_check,
    list_configs,
    match_rule,
    refresh_configs,
    resolve_ratio,
    save_config,
    ListConfigsQuery,
    MatchRuleRequest,
    MatchRuleResponse,
    RatioConfigDetail,
    ResolveRequest,
};
