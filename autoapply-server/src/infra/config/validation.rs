use super::models::Config;

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

/// Settings that are legal but likely to surprise an operator.
pub fn collect_warnings(config: &Config) -> ConfigWarnings {
    let mut warnings = ConfigWarnings::default();
    let tuning = &config.scheduler.tuning;

    if config.adapter.command.is_none() {
        warnings.push_with_hint(
            "No automation command configured; the server cannot run jobs",
            "Set adapter.command in autoapply.toml or ADAPTER_COMMAND",
        );
    }

    if tuning.channel_capacity < tuning.pool_size {
        warnings.push_with_hint(
            format!(
                "scheduler.channel_capacity ({}) is below scheduler.pool_size ({})",
                tuning.channel_capacity, tuning.pool_size
            ),
            "Claims that do not fit the channel are returned to the queue every cycle",
        );
    }

    if tuning.inflight_ceiling() < tuning.pool_size as u64 {
        warnings.push(format!(
            "scheduler.inflight_multiple ({}) keeps fewer jobs in flight than there are workers",
            tuning.inflight_multiple
        ));
    }

    warnings
}
