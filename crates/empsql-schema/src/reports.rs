//! Canned overview reports over the employees schema
//!
//! Rows whose `to_date` is `9999-01-01` are current in the employees
//! dataset.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub name: &'static str,
    pub title: &'static str,
    pub sql: &'static str,
}

pub const EMPLOYEE_COUNT: Report = Report {
    name: "employee_count",
    title: "Total Employees",
    sql: "SELECT COUNT(*) AS total_employees FROM employees",
};

pub const DEPARTMENT_SUMMARY: Report = Report {
    name: "department_summary",
    title: "Department Summary",
    sql: "SELECT d.dept_name, COUNT(de.emp_no) AS employee_count \
          FROM departments d \
          LEFT JOIN dept_emp de ON d.dept_no = de.dept_no \
          WHERE de.to_date = '9999-01-01' \
          GROUP BY d.dept_name \
          ORDER BY employee_count DESC",
};

pub const SALARY_STATISTICS: Report = Report {
    name: "salary_statistics",
    title: "Salary Statistics",
    sql: "SELECT AVG(salary) AS avg_salary, MIN(salary) AS min_salary, \
          MAX(salary) AS max_salary, COUNT(*) AS total_records \
          FROM salaries \
          WHERE to_date = '9999-01-01'",
};

pub fn overview() -> [Report; 3] {
    [EMPLOYEE_COUNT, DEPARTMENT_SUMMARY, SALARY_STATISTICS]
}

/// Employees hired in `year`, oldest hire first.
pub fn hired_in(year: i32) -> String {
    format!(
        "SELECT first_name, last_name, hire_date, gender \
         FROM employees \
         WHERE YEAR(hire_date) = {} \
         ORDER BY hire_date",
        year
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overview_order() {
        let names: Vec<_> = overview().iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["employee_count", "department_summary", "salary_statistics"]);
    }

    #[test]
    fn test_hired_in_embeds_year() {
        let sql = hired_in(1990);
        assert!(sql.contains("WHERE YEAR(hire_date) = 1990 ORDER BY hire_date"));

        let sql = hired_in(-5);
        assert!(sql.contains("= -5 "));
    }
}
