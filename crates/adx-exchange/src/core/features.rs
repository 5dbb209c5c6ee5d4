use adx_types::BidRequest;

/// Feature completion: enrich the assignments map with fields derived
/// from the request so targeting can match on them. Derivations never
/// overwrite values the adapter set explicitly, and a failed derivation
/// just leaves the field absent.
pub fn complete(request: &mut BidRequest) {
    let mut derived: Vec<(&str, String)> = Vec::new();

    if !request.device.os.is_empty() {
        derived.push(("USER_OS", request.device.os.to_lowercase()));
    }
    if !request.device.os_version.is_empty() {
        derived.push(("OS_VERSION", request.device.os_version.clone()));
    }
    if let Some(class) = device_class(&request.device.ua, request.device.screen_w, request.device.screen_h)
    {
        derived.push(("DEVICE_CLASS", class.to_string()));
    }

    let geo = if !request.user.geo.is_empty() {
        Some(request.user.geo.clone())
    } else {
        geo_bucket_from_ip(&request.device.ip)
    };
    if let Some(geo) = geo {
        derived.push(("GEO", geo));
    }

    if !request.user.age_bucket.is_empty() {
        derived.push(("AGE_BUCKET", request.user.age_bucket.clone()));
    }
    if !request.user.gender.is_empty() {
        derived.push(("GENDER", request.user.gender.clone()));
    }

    if let Some(imp) = request.imp.first() {
        if imp.width > 0 {
            derived.push(("AD_WIDTH", imp.width.to_string()));
        }
        if imp.height > 0 {
            derived.push(("AD_HEIGHT", imp.height.to_string()));
        }
        for format in &imp.formats {
            derived.push(("SLOT_FORMAT", format.clone()));
        }
    }

    for (field, value) in derived {
        let entry = request.assignments.entry(field.to_string()).or_default();
        if field == "SLOT_FORMAT" {
            if !entry.contains(&value) {
                entry.push(value);
            }
        } else if entry.is_empty() {
            entry.push(value);
        }
    }
}

/// Coarse device class from UA hints, falling back to screen geometry.
fn device_class(ua: &str, screen_w: u32, screen_h: u32) -> Option<&'static str> {
    let ua_lower = ua.to_lowercase();
    if ua_lower.contains("ipad") || ua_lower.contains("tablet") {
        return Some("tablet");
    }
    if ua_lower.contains("mobile") || ua_lower.contains("iphone") || ua_lower.contains("android") {
        return Some("phone");
    }
    if screen_w == 0 || screen_h == 0 {
        return None;
    }
    if screen_w.min(screen_h) >= 768 {
        Some("tablet")
    } else {
        Some("phone")
    }
}

/// First-octet bucket for public IPv4 addresses. Private, loopback and
/// unparseable addresses derive nothing.
fn geo_bucket_from_ip(ip: &str) -> Option<String> {
    let first: u8 = ip.split('.').next()?.parse().ok()?;
    if first == 10 || first == 127 || first == 192 || first == 172 || first == 0 {
        return None;
    }
    Some(format!("ipv4-{first}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adx_types::Impression;

    fn request() -> BidRequest {
        let mut req = BidRequest::new("r1", vec![Impression::banner("1", 320, 50)]);
        req.device.os = "iOS".to_string();
        req.device.os_version = "17.2".to_string();
        req.device.ua = "Mozilla/5.0 (iPhone) Mobile".to_string();
        req.device.ip = "8.8.8.8".to_string();
        req.user.geo = "cn-sh".to_string();
        req
    }

    #[test]
    fn derives_standard_fields() {
        let mut req = request();
        complete(&mut req);

        assert_eq!(req.assignments["USER_OS"], vec!["ios"]);
        assert_eq!(req.assignments["OS_VERSION"], vec!["17.2"]);
        assert_eq!(req.assignments["DEVICE_CLASS"], vec!["phone"]);
        assert_eq!(req.assignments["GEO"], vec!["cn-sh"]);
        assert_eq!(req.assignments["AD_WIDTH"], vec!["320"]);
        assert_eq!(req.assignments["SLOT_FORMAT"], vec!["banner"]);
    }

    #[test]
    fn explicit_assignments_win() {
        let mut req = request();
        req.assignments
            .insert("USER_OS".to_string(), vec!["harmonyos".to_string()]);
        complete(&mut req);
        assert_eq!(req.assignments["USER_OS"], vec!["harmonyos"]);
    }

    #[test]
    fn geo_falls_back_to_ip_bucket() {
        let mut req = request();
        req.user.geo.clear();
        complete(&mut req);
        assert_eq!(req.assignments["GEO"], vec!["ipv4-8"]);
    }

    #[test]
    fn private_ip_derives_no_geo() {
        let mut req = request();
        req.user.geo.clear();
        req.device.ip = "192.168.1.10".to_string();
        complete(&mut req);
        assert!(!req.assignments.contains_key("GEO"));
    }

    #[test]
    fn tablet_classification_from_screen() {
        assert_eq!(device_class("", 768, 1024), Some("tablet"));
        assert_eq!(device_class("", 390, 844), Some("phone"));
        assert_eq!(device_class("", 0, 0), None);
        assert_eq!(device_class("Mozilla (iPad)", 0, 0), Some("tablet"));
    }
}
