//! VIN World Manufacturer Identifier → brand → DID family.

use serde::{Deserialize, Serialize};

/// Vehicle brand inferred from the WMI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Manufacturer {
    Volkswagen,
    Audi,
    Seat,
    Skoda,
    Porsche,
    Bmw,
    Mini,
    MercedesBenz,
    Ford,
    Chevrolet,
    Cadillac,
    Buick,
    Gmc,
    Toyota,
    Lexus,
    Honda,
    Acura,
    Nissan,
    Infiniti,
    Hyundai,
    Kia,
    Genesis,
    Mazda,
    Subaru,
    Mitsubishi,
    Volvo,
    Jeep,
    Chrysler,
    Fiat,
    Peugeot,
    Citroen,
    Renault,
    Jaguar,
    LandRover,
    Tesla,
}

/// Brands that share one odometer DID set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DidFamily {
    VwGroup,
    Bmw,
    Mercedes,
    Ford,
    Gm,
    Toyota,
    Honda,
    Nissan,
    HyundaiKia,
    Mazda,
    Subaru,
    Mitsubishi,
    Volvo,
    Stellantis,
    Renault,
    Jlr,
    Tesla,
}

impl Manufacturer {
    /// Brand for a VIN's first three characters.
    pub fn from_wmi(wmi: &str) -> Option<Self> {
        let wmi = wmi.get(..3)?.to_ascii_uppercase();
        let brand = match wmi.as_str() {
            "WVW" | "WVG" | "WV1" | "WV2" | "1VW" | "3VW" | "9BW" | "AAV" | "8AW" => {
                Self::Volkswagen
            }
            "WAU" | "WA1" | "WUA" | "TRU" => Self::Audi,
            "VSS" => Self::Seat,
            "TMB" => Self::Skoda,
            "WP0" | "WP1" => Self::Porsche,
            "WBA" | "WBS" | "WBX" | "WBY" | "5UX" | "5YM" | "4US" => Self::Bmw,
            "WMW" => Self::Mini,
            "WDB" | "WDC" | "WDD" | "WDF" | "W1K" | "W1N" | "W1V" | "4JG" | "55S" => {
                Self::MercedesBenz
            }
            "1FA" | "1FB" | "1FC" | "1FD" | "1FM" | "1FT" | "1ZV" | "2FA" | "2FM" | "3FA"
            | "WF0" | "NM0" | "MAJ" => Self::Ford,
            "1G1" | "1GC" | "1GN" | "2G1" | "3G1" | "KL1" | "KL7" => Self::Chevrolet,
            "1G6" | "1GY" => Self::Cadillac,
            "1G4" | "2G4" => Self::Buick,
            "1GT" | "1GK" => Self::Gmc,
            "JTH" | "JTJ" | "2T2" => Self::Lexus,
            "JTD" | "JTE" | "JTM" | "JTN" | "JTK" | "4T1" | "4T3" | "5TD" | "5TF" | "2T1"
            | "SB1" => Self::Toyota,
            "19U" | "JH4" | "5J8" => Self::Acura,
            "JHM" | "1HG" | "2HG" | "5FN" | "5J6" | "SHH" | "19X" => Self::Honda,
            "JNK" | "JNR" | "5N3" => Self::Infiniti,
            "JN1" | "JN8" | "1N4" | "1N6" | "3N1" | "5N1" | "SJN" | "VSK" => Self::Nissan,
            "KMT" => Self::Genesis,
            "KMH" | "KM8" | "5NP" | "5NM" | "TMA" => Self::Hyundai,
            "KNA" | "KND" | "5XY" | "5XX" | "U5Y" => Self::Kia,
            "JM1" | "JM3" | "JMZ" | "3MZ" | "3MV" => Self::Mazda,
            "JF1" | "JF2" | "4S3" | "4S4" => Self::Subaru,
            "JA3" | "JA4" | "JMB" | "ML3" => Self::Mitsubishi,
            "YV1" | "YV4" | "7JR" => Self::Volvo,
            "1C4" | "1J4" | "1J8" | "ZAC" => Self::Jeep,
            "1C3" | "2C3" | "2C4" | "3C4" | "1C6" | "3C6" => Self::Chrysler,
            "ZFA" | "3C3" => Self::Fiat,
            "VF3" | "VR3" => Self::Peugeot,
            "VF7" | "VR7" => Self::Citroen,
            "VF1" | "VF6" | "UU1" => Self::Renault,
            "SAJ" => Self::Jaguar,
            "SAL" => Self::LandRover,
            "5YJ" | "7SA" | "LRW" | "XP7" => Self::Tesla,
            _ => return None,
        };
        Some(brand)
    }

    /// Parent group whose DIDs this brand uses.
    pub fn family(self) -> DidFamily {
        match self {
            Self::Volkswagen | Self::Audi | Self::Seat | Self::Skoda | Self::Porsche => {
                DidFamily::VwGroup
            }
            Self::Bmw | Self::Mini => DidFamily::Bmw,
            Self::MercedesBenz => DidFamily::Mercedes,
            Self::Ford => DidFamily::Ford,
            Self::Chevrolet | Self::Cadillac | Self::Buick | Self::Gmc => DidFamily::Gm,
            Self::Toyota | Self::Lexus => DidFamily::Toyota,
            Self::Honda | Self::Acura => DidFamily::Honda,
            Self::Nissan | Self::Infiniti => DidFamily::Nissan,
            Self::Hyundai | Self::Kia | Self::Genesis => DidFamily::HyundaiKia,
            Self::Mazda => DidFamily::Mazda,
            Self::Subaru => DidFamily::Subaru,
            Self::Mitsubishi => DidFamily::Mitsubishi,
            Self::Volvo => DidFamily::Volvo,
            Self::Jeep | Self::Chrysler | Self::Fiat | Self::Peugeot | Self::Citroen => {
                DidFamily::Stellantis
            }
            Self::Renault => DidFamily::Renault,
            Self::Jaguar | Self::LandRover => DidFamily::Jlr,
            Self::Tesla => DidFamily::Tesla,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Volkswagen => "volkswagen",
            Self::Audi => "audi",
            Self::Seat => "seat",
            Self::Skoda => "skoda",
            Self::Porsche => "porsche",
            Self::Bmw => "bmw",
            Self::Mini => "mini",
            Self::MercedesBenz => "mercedes-benz",
            Self::Ford => "ford",
            Self::Chevrolet => "chevrolet",
            Self::Cadillac => "cadillac",
            Self::Buick => "buick",
            Self::Gmc => "gmc",
            Self::Toyota => "toyota",
            Self::Lexus => "lexus",
            Self::Honda => "honda",
            Self::Acura => "acura",
            Self::Nissan => "nissan",
            Self::Infiniti => "infiniti",
            Self::Hyundai => "hyundai",
            Self::Kia => "kia",
            Self::Genesis => "genesis",
            Self::Mazda => "mazda",
            Self::Subaru => "subaru",
            Self::Mitsubishi => "mitsubishi",
            Self::Volvo => "volvo",
            Self::Jeep => "jeep",
            Self::Chrysler => "chrysler",
            Self::Fiat => "fiat",
            Self::Peugeot => "peugeot",
            Self::Citroen => "citroen",
            Self::Renault => "renault",
            Self::Jaguar => "jaguar",
            Self::LandRover => "land-rover",
            Self::Tesla => "tesla",
        }
    }
}
