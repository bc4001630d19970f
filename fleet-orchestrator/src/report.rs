use fleet_common::FleetSnapshot;

use crate::config::Config;

const LINE_BREAK: &str = "<br />";
const REPORT_LOG_COUNT: usize = 10;
const REPORT_FOOTER: &str = "For more details, see the fleet-orchestrator repository";

/// Hourly (non-preemptible, preemptible) prices for the machine types the
/// fleet is allowed to run.
pub fn pricing_for(machine_type: &str) -> Option<(f64, f64)> {
    let pricing = match machine_type {
        "f1-micro" => (0.006, 0.005),
        "g1-small" => (0.021, 0.010),
        "n1-standard-1" => (0.038, 0.015),
        "n1-standard-2" => (0.076, 0.030),
        "n1-standard-4" => (0.152, 0.060),
        "n1-standard-8" => (0.304, 0.120),
        "n1-standard-16" => (0.608, 0.240),
        "n1-standard-32" => (1.216, 0.480),
        "n1-highmem-2" => (0.096, 0.035),
        "n1-highmem-4" => (0.192, 0.070),
        "n1-highmem-8" => (0.384, 0.140),
        "n1-highmem-16" => (0.768, 0.280),
        "n1-highmem-32" => (1.536, 0.560),
        "n1-highcpu-2" => (0.058, 0.020),
        "n1-highcpu-4" => (0.116, 0.040),
        "n1-highcpu-8" => (0.232, 0.080),
        "n1-highcpu-16" => (0.464, 0.160),
        "n1-highcpu-32" => (0.928, 0.320),
        _ => return None,
    };
    Some(pricing)
}

fn round5(value: f64) -> f64 {
    (value * 1e5).round() / 1e5
}

fn render_html_table(rows: &[Vec<String>]) -> String {
    let mut html = String::from("<table border=\"1\">");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str("<td>");
            html.push_str(cell);
            html.push_str("</td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

fn config_table(config: &Config) -> Vec<Vec<String>> {
    config
        .summary_rows()
        .into_iter()
        .map(|(key, value)| vec![key, value])
        .collect()
}

fn cost_table(config: &Config, cache: &FleetSnapshot) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "Usage Type".to_string(),
        "Usage Hour".to_string(),
        "Cost/Hour".to_string(),
        "Total".to_string(),
        "Savings".to_string(),
    ]];
    let mut npe_hour = 0.0;
    let mut pe_hour = 0.0;
    for zone_name in &config.zones {
        if let Some(zone) = cache.zone(zone_name) {
            npe_hour += zone.non_preemptible_uptime_hour;
            pe_hour += zone.preemptible_uptime_hour;
        }
    }
    let (npe_pricing, pe_pricing) = pricing_for(&config.machine_type).unwrap_or((0.0, 0.0));
    let npe_total = npe_pricing * npe_hour;
    let pe_total = pe_pricing * pe_hour;
    let savings = (npe_pricing * pe_hour) - (pe_pricing * pe_hour);
    rows.push(vec![
        "PE".to_string(),
        format!("{}", round5(pe_hour)),
        format!("${}", pe_pricing),
        format!("${}", round5(pe_total)),
        format!("${}", round5(savings)),
    ]);
    rows.push(vec![
        "NPE".to_string(),
        format!("{}", round5(npe_hour)),
        format!("${}", npe_pricing),
        format!("${}", round5(npe_total)),
        "$0".to_string(),
    ]);
    rows.push(vec![
        "All".to_string(),
        format!("{}", round5(pe_hour + npe_hour)),
        String::new(),
        format!("${}", round5(pe_total + npe_total)),
        format!("${}", round5(savings)),
    ]);
    rows
}

fn instance_table(config: &Config, cache: &FleetSnapshot) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "Node".to_string(),
        "Zone".to_string(),
        "Private IP".to_string(),
        "Type".to_string(),
        "Uptime Hour".to_string(),
        "Flag".to_string(),
        "Status".to_string(),
    ]];
    for instance in cache.instances() {
        let mut node = instance.name.clone();
        for prefix in &config.instance_name_prefixes {
            node = node.replace(prefix.as_str(), "");
        }
        rows.push(vec![
            node,
            instance.zone.clone(),
            instance.ip.clone().unwrap_or_default(),
            instance.kind_label().to_string(),
            format!("{}", round5(instance.uptime_hour)),
            format!("{:?}", instance.flag),
            format!("{:?}", instance.status).to_lowercase(),
        ]);
    }
    rows
}

fn zone_table(config: &Config, cache: &FleetSnapshot, live: &FleetSnapshot) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "Zone".to_string(),
        "Instance".to_string(),
        "Uptime Hour".to_string(),
        "Termination".to_string(),
        "Termination Rate".to_string(),
    ]];
    for zone_name in &config.zones {
        let (uptime, terminations, rate) = cache
            .zone(zone_name)
            .map(|z| (z.total_uptime_hour(), z.total_termination_count, z.termination_rate()))
            .unwrap_or((0.0, 0, 0.0));
        rows.push(vec![
            zone_name.clone(),
            live.instance_count_in(zone_name).to_string(),
            format!("{}", round5(uptime)),
            terminations.to_string(),
            format!("{}", rate),
        ]);
    }
    rows
}

/// Operator report sent with lifecycle emails: recent log excerpt followed
/// by cost, zone, instance and configuration tables.
pub fn html_summary(
    config: &Config,
    cache: &FleetSnapshot,
    live: &FleetSnapshot,
    log_lines: &[String],
) -> String {
    let skip = log_lines.len().saturating_sub(REPORT_LOG_COUNT);
    let excerpt = log_lines[skip..].join(LINE_BREAK);
    [
        excerpt,
        format!("{0}{0}Estimated Cost/Savings{0}", LINE_BREAK),
        render_html_table(&cost_table(config, cache)),
        format!("{0}{0}Zone(s) Configured{0}", LINE_BREAK),
        render_html_table(&zone_table(config, cache, live)),
        format!("{0}{0}Instance List{0}", LINE_BREAK),
        render_html_table(&instance_table(config, cache)),
        format!("{0}{0}Fleet Orchestrator Configuration{0}", LINE_BREAK),
        render_html_table(&config_table(config)),
        format!("{0}{0}{1}", LINE_BREAK, REPORT_FOOTER),
    ]
    .concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::base_config;
    use fleet_common::{Instance, InstanceFlag, InstanceStatus, Zone};

    fn snapshots() -> (FleetSnapshot, FleetSnapshot) {
        let mut cache = FleetSnapshot::default();
        let mut zone = Zone::new("us-a");
        zone.preemptible_uptime_hour = 100.0;
        zone.non_preemptible_uptime_hour = 10.0;
        zone.total_termination_count = 4;
        cache.add_zone(zone);
        let instance = Instance {
            name: "fleet-web-1".to_string(),
            zone: "us-a".to_string(),
            machine_type: "n1-standard-1".to_string(),
            ip: Some("10.0.0.1".to_string()),
            creation_timestamp: None,
            preemptible: true,
            status: InstanceStatus::Running,
            flag: InstanceFlag::New,
            uptime_hour: 3.0,
        };
        let mut live = FleetSnapshot::default();
        live.upsert_instance(instance.clone());
        cache.upsert_instance(instance);
        (cache, live)
    }

    #[test]
    fn pricing_covers_the_configured_machine_type() {
        assert_eq!(pricing_for("n1-standard-1"), Some((0.038, 0.015)));
        assert!(pricing_for("made-up-type").is_none());
    }

    #[test]
    fn cost_table_reports_preemptible_savings() {
        let (cache, _) = snapshots();
        let rows = cost_table(&base_config(), &cache);
        // 100 preemptible hours at $0.015 vs $0.038 on demand.
        assert_eq!(rows[1][1], "100");
        assert_eq!(rows[1][3], "$1.5");
        assert_eq!(rows[1][4], "$2.3");
    }

    #[test]
    fn instance_names_are_prefix_stripped() {
        let (cache, _) = snapshots();
        let mut config = base_config();
        config.instance_name_prefixes = vec!["fleet-".to_string()];
        let rows = instance_table(&config, &cache);
        assert_eq!(rows[1][0], "web-1");
    }

    #[test]
    fn summary_contains_every_section() {
        let (cache, live) = snapshots();
        let html = html_summary(&base_config(), &cache, &live, &["one".to_string()]);
        for section in [
            "Estimated Cost/Savings",
            "Zone(s) Configured",
            "Instance List",
            "Fleet Orchestrator Configuration",
        ] {
            assert!(html.contains(section), "missing section {}", section);
        }
        assert!(html.starts_with("one"));
    }
}
