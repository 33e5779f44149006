use crate::error::PipelineError;
use chrono::{DateTime, SecondsFormat, Utc};
use common::config::FilterFormat;
use minijinja::{context, Environment, UndefinedBehavior, Value};

/// Turn the mapping's filter format and the last successful sync time into a
/// source-side filter expression.
///
/// Templates see `timestamp` (RFC 3339), `date`, `time` and `datetime`
/// (`YYYY-MM-DD HH:MM:SS`). Condition triples render as `field op 'value'`
/// joined with ` AND `. Unknown template variables are an error.
pub fn build_incremental_filter(
    format: &FilterFormat,
    watermark: DateTime<Utc>,
) -> Result<String, PipelineError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let vars = context! {
        timestamp => watermark.to_rfc3339_opts(SecondsFormat::Secs, true),
        date => watermark.format("%Y-%m-%d").to_string(),
        time => watermark.format("%H:%M:%S").to_string(),
        datetime => watermark.format("%Y-%m-%d %H:%M:%S").to_string(),
    };

    match format {
        FilterFormat::Template(template) => render(&env, template, &vars),
        FilterFormat::Conditions(conditions) => {
            if conditions.is_empty() {
                return Err(PipelineError::filter(
                    "timestamp_filter_format has no conditions",
                ));
            }
            let parts = conditions
                .iter()
                .map(|c| {
                    let value = render(&env, c.value_template(), &vars)?;
                    Ok(format!("{} {} '{}'", c.field(), c.operator(), value))
                })
                .collect::<Result<Vec<_>, PipelineError>>()?;
            Ok(parts.join(" AND "))
        }
    }
}

fn render(env: &Environment<'_>, template: &str, vars: &Value) -> Result<String, PipelineError> {
    Ok(env.render_str(template, vars)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::config::FilterCondition;

    fn watermark() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap()
    }

    #[test]
    fn renders_template_variables() {
        let fmt = FilterFormat::Template("modified_date >= '{{ date }}' AND t >= '{{ time }}'".into());
        assert_eq!(
            build_incremental_filter(&fmt, watermark()).unwrap(),
            "modified_date >= '2025-03-09' AND t >= '12:00:00'"
        );

        let fmt = FilterFormat::Template("changed > {{ timestamp }}".into());
        assert_eq!(
            build_incremental_filter(&fmt, watermark()).unwrap(),
            "changed > 2025-03-09T12:00:00Z"
        );
    }

    #[test]
    fn joins_conditions_with_and() {
        let fmt = FilterFormat::Conditions(vec![
            FilterCondition("modified_date".into(), ">".into(), "{{ datetime }}".into()),
            FilterCondition("active".into(), "=".into(), "1".into()),
        ]);
        assert_eq!(
            build_incremental_filter(&fmt, watermark()).unwrap(),
            "modified_date > '2025-03-09 12:00:00' AND active = '1'"
        );
    }

    #[test]
    fn unknown_variables_and_empty_conditions_fail() {
        let fmt = FilterFormat::Template("x > '{{ modified }}'".into());
        assert!(matches!(
            build_incremental_filter(&fmt, watermark()),
            Err(PipelineError::Filter { .. })
        ));
        assert!(build_incremental_filter(&FilterFormat::Conditions(vec![]), watermark()).is_err());
    }
}
